use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::report::ReductionStats;
use crate::runner::CommandRunner;

use super::picire::normalize_dd_stats;
use super::{dd_common_args, grammar_for, DdOptions};

/// Reductor picireny: delta debugging jerárquico (HDD) sobre el árbol de
/// parseo, con la gramática elegida según la extensión de la entrada.
pub struct Picireny {
    pub dd: DdOptions,
    /// Directorio con los archivos de gramática (.g4 y bases del lexer).
    pub grammars: PathBuf,
}

impl Picireny {
    pub fn build_command(
        &self,
        oracle: &Path,
        input: &Path,
        scratch: &Path,
        stats: &Path,
    ) -> Result<Vec<String>> {
        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .with_context(|| {
                format!("la entrada {} no tiene extensión", input.display())
            })?;
        let (grammar, start_rule) = grammar_for(extension, &self.grammars)?;

        let mut command = vec![
            "picireny".to_string(),
            "--sys-recursion-limit".to_string(),
            "10000".to_string(),
            "--flatten-recursion".to_string(),
            "--start".to_string(),
            start_rule.to_string(),
            "--grammar".to_string(),
        ];
        command.extend(grammar.iter().map(|g| g.display().to_string()));

        command.extend(dd_common_args(&self.dd, oracle, input, scratch, stats));
        Ok(command)
    }

    pub fn normalize_report(
        &self,
        runner: &dyn CommandRunner,
        stats_path: &Path,
        input: &Path,
        out_dir: &Path,
        scratch: &Path,
    ) -> Result<ReductionStats> {
        normalize_dd_stats("picireny", runner, stats_path, input, out_dir, scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picireny() -> Picireny {
        Picireny {
            dd: DdOptions {
                dd_star: false,
                cache: "config".to_string(),
                cache_fail: false,
                evict_after_fail: true,
                parallel: false,
                jobs: 1,
            },
            grammars: PathBuf::from("/g"),
        }
    }

    #[test]
    fn selecciona_la_gramatica_por_extension() {
        let cmd = picireny()
            .build_command(
                Path::new("/suite/test.sh"),
                Path::new("/suite/3299-orig.js"),
                Path::new("/tmp/scratch"),
                Path::new("/out/picireny.json"),
            )
            .unwrap();

        assert_eq!(cmd[0], "picireny");
        assert!(cmd.contains(&"--flatten-recursion".to_string()));
        assert!(cmd.contains(&"program".to_string()));
        assert!(cmd.contains(&"/g/JavaScriptParser.g4".to_string()));
        assert!(cmd.contains(&"--stat-file".to_string()));
    }

    #[test]
    fn entrada_de_c_usa_compilation_unit() {
        let cmd = picireny()
            .build_command(
                Path::new("/suite/r.sh"),
                Path::new("/suite/small.c"),
                Path::new("/tmp/scratch"),
                Path::new("/out/picireny.json"),
            )
            .unwrap();

        assert!(cmd.contains(&"compilationUnit".to_string()));
        assert!(cmd.contains(&"/g/C.g4".to_string()));
    }

    #[test]
    fn extension_no_soportada_es_error() {
        let res = picireny().build_command(
            Path::new("/suite/r.sh"),
            Path::new("/suite/input.rs"),
            Path::new("/tmp/scratch"),
            Path::new("/out/picireny.json"),
        );
        assert!(res.is_err());
    }

    #[test]
    fn entrada_sin_extension_es_error() {
        let res = picireny().build_command(
            Path::new("/suite/r.sh"),
            Path::new("/suite/entrada"),
            Path::new("/tmp/scratch"),
            Path::new("/out/picireny.json"),
        );
        assert!(res.is_err());
    }
}
