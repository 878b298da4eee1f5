use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::report::{kbytes, nws_size, round2, ReductionStats};
use crate::runner::CommandRunner;

use super::{promote_reduced, remove_orig_leftovers};

/// Reductor Perses: jar precompilado invocado vía java, con el explorador
/// de objetos como javaagent para perfilar la memoria de su caché.
pub struct Perses {
    pub jar: PathBuf,
    pub object_explorer: PathBuf,
    pub cache: String,
    pub jobs: usize,
}

impl Perses {
    pub fn build_command(
        &self,
        oracle: &Path,
        input: &Path,
        scratch: &Path,
        stats: &Path,
    ) -> Result<Vec<String>> {
        let pqcm = pqcm_path(stats)?;

        // En una reducción solo se puede medir el tamaño en memoria de la
        // caché O su número de entradas, no ambos. El tamaño tiene prioridad.
        Ok(vec![
            "java".to_string(),
            format!("-javaagent:{}", self.object_explorer.display()),
            "-jar".to_string(),
            self.jar.display().to_string(),
            "--verbosity".to_string(),
            "CONFIG".to_string(),
            "--query-caching".to_string(),
            "TRUE".to_string(),
            "--code-format".to_string(),
            "ORIG_FORMAT".to_string(),
            "--test-script".to_string(),
            oracle.display().to_string(),
            "--input-file".to_string(),
            input.display().to_string(),
            "--output-dir".to_string(),
            scratch.display().to_string(),
            "--threads".to_string(),
            self.jobs.to_string(),
            "--stat-dump-file".to_string(),
            stats.display().to_string(),
            "--query-cache-type".to_string(),
            self.cache.clone(),
            "--profile-query-cache-memory".to_string(),
            pqcm.display().to_string(),
        ])
    }

    /// Normaliza el volcado de estadísticas de Perses: tabla de texto
    /// principal, archivo acompañante del testscript y perfil .pqcm.
    pub fn normalize_report(
        &self,
        runner: &dyn CommandRunner,
        stats_path: &Path,
        input: &Path,
        out_dir: &Path,
        scratch: &Path,
    ) -> Result<ReductionStats> {
        // Tabla principal:
        // iteration before_size after_size removed_tokens time(ms) queries
        let contents = fs::read_to_string(stats_path)
            .with_context(|| format!("no se pudo leer {}", stats_path.display()))?;

        let mut runtime = 0.0;
        let mut tests_started = 0;
        let mut iterations = None;

        for line in contents.lines() {
            if line.contains("total") {
                let parts: Vec<&str> = line.split_whitespace().collect();
                let millis: f64 = parts
                    .get(5)
                    .context("la fila total del volcado está incompleta")?
                    .parse()?;
                runtime = round2(millis / 1000.0);
                tests_started = parts
                    .get(6)
                    .context("la fila total del volcado está incompleta")?
                    .parse()?;
            }

            if line.contains("iterations") {
                let last = line.split('=').last().unwrap_or("").trim();
                iterations = Some(last.parse()?);
            }
        }

        // Acompañante del testscript: pass_count / fail_count
        let file_name = stats_path
            .file_name()
            .and_then(|n| n.to_str())
            .context("ruta de estadísticas sin nombre")?;
        let secondary = stats_path.with_file_name(format!("testscript-{file_name}"));
        let contents = fs::read_to_string(&secondary)
            .with_context(|| format!("no se pudo leer {}", secondary.display()))?;

        let mut tests_passed = 0;
        let mut tests_failed = 0;
        for line in contents.lines() {
            if line.contains("pass_count") {
                tests_passed = line.split('=').last().unwrap_or("").trim().parse()?;
            }
            if line.contains("fail_count") {
                tests_failed = line.split('=').last().unwrap_or("").trim().parse()?;
            }
        }

        // Perfil de memoria de la caché: "timestamp cache_size (bytes)"
        let pqcm = pqcm_path(stats_path)?;
        let contents = fs::read_to_string(&pqcm)
            .with_context(|| format!("no se pudo leer {}", pqcm.display()))?;

        let mut cache_size: u64 = 0;
        for line in contents.lines() {
            if let Some(last) = line.split_whitespace().last() {
                cache_size = cache_size.max(last.parse()?);
            }
        }

        let destination = promote_reduced(input, scratch, out_dir)?;

        let stats = ReductionStats {
            reducer: self.probe_version(runner, scratch),
            runtime,
            iterations,
            tests_started,
            tests_passed,
            tests_failed,
            cache_kbytes: kbytes(cache_size),
            path_input: input.display().to_string(),
            path_output: destination.display().to_string(),
            bytes_input: fs::metadata(input)?.len(),
            bytes_output: fs::metadata(&destination)?.len(),
            nws_input: nws_size(input)?,
            nws_output: nws_size(&destination)?,
            peak_memory_kbytes: None,
        };

        // Perses deja archivos "input.timestamp.orig" junto a la entrada.
        remove_orig_leftovers(input);

        Ok(stats)
    }

    /// "perses-<versión>-<sha corto>"; un sondeo fallido cae a
    /// "perses-unknown" sin bloquear la normalización.
    fn probe_version(&self, runner: &dyn CommandRunner, cwd: &Path) -> String {
        let argv = vec![
            "java".to_string(),
            "-jar".to_string(),
            self.jar.display().to_string(),
            "--version".to_string(),
        ];

        let Ok((0, stdout)) = runner.run(&argv, cwd, &[]) else {
            return "perses-unknown".to_string();
        };

        let mut version = "perses".to_string();
        for line in stdout.lines() {
            if line.contains("perses version") {
                if let Some(last) = line.split_whitespace().last() {
                    version = format!("{version}-{last}");
                }
            }
            if line.contains("Git Version") {
                if let Some(last) = line.split_whitespace().last() {
                    let short: String = last.chars().take(7).collect();
                    version = format!("{version}-{short}");
                }
            }
        }

        version
    }
}

fn pqcm_path(stats: &Path) -> Result<PathBuf> {
    let stem = stats
        .file_stem()
        .and_then(|s| s.to_str())
        .context("ruta de estadísticas sin nombre")?;
    Ok(stats.with_file_name(format!("{stem}.pqcm")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Runner falso: responde al sondeo de versión con una salida fija.
    struct VersionRunner(String);

    impl CommandRunner for VersionRunner {
        fn run(&self, argv: &[String], _: &Path, _: &[(String, String)]) -> Result<(i32, String)> {
            assert!(argv.contains(&"--version".to_string()));
            Ok((0, self.0.clone()))
        }
    }

    struct FailingRunner;

    impl CommandRunner for FailingRunner {
        fn run(&self, _: &[String], _: &Path, _: &[(String, String)]) -> Result<(i32, String)> {
            Ok((1, "sin soporte".to_string()))
        }
    }

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("perses_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn perses() -> Perses {
        Perses {
            jar: PathBuf::from("/opt/perses.jar"),
            object_explorer: PathBuf::from("/opt/explorer.jar"),
            cache: "COMPACT_QUERY_CACHE".to_string(),
            jobs: 1,
        }
    }

    /// Deja en disco los tres artefactos nativos que Perses produce.
    fn write_native_stats(out_dir: &Path, scratch: &Path, input: &Path) -> PathBuf {
        let stats = out_dir.join("perses.json");
        fs::write(
            &stats,
            "iteration before_size after_size removed_tokens time(ms) queries\n\
             total 149 42 107 0 12823 124\n\
             iterations=3\n",
        )
        .unwrap();

        fs::write(
            out_dir.join("testscript-perses.json"),
            "pass_count=40\nfail_count=84\n",
        )
        .unwrap();

        fs::write(
            out_dir.join("perses.pqcm"),
            "1700000000 1024\n1700000001 19000\n1700000002 512\n",
        )
        .unwrap();

        fs::write(scratch.join(input.file_name().unwrap()), "int a;\n").unwrap();
        stats
    }

    #[test]
    fn comando_determinista_con_rutas_y_cache() {
        let cmd = perses()
            .build_command(
                Path::new("/suite/r.sh"),
                Path::new("/suite/small.c"),
                Path::new("/tmp/scratch"),
                Path::new("/out/perses.json"),
            )
            .unwrap();

        assert_eq!(cmd[0], "java");
        assert_eq!(cmd[1], "-javaagent:/opt/explorer.jar");
        assert!(cmd.contains(&"--test-script".to_string()));
        assert!(cmd.contains(&"/suite/r.sh".to_string()));
        assert!(cmd.contains(&"COMPACT_QUERY_CACHE".to_string()));
        assert!(cmd.contains(&"/out/perses.pqcm".to_string()));

        // mismo comando en cada invocación
        let again = perses()
            .build_command(
                Path::new("/suite/r.sh"),
                Path::new("/suite/small.c"),
                Path::new("/tmp/scratch"),
                Path::new("/out/perses.json"),
            )
            .unwrap();
        assert_eq!(cmd, again);
    }

    #[test]
    fn normaliza_el_volcado_nativo_completo() {
        let tmp = temp_dir("normaliza");
        let out_dir = tmp.join("out");
        let scratch = tmp.join("scratch");
        fs::create_dir_all(&out_dir).unwrap();
        fs::create_dir_all(&scratch).unwrap();

        let input = tmp.join("small.c");
        fs::write(&input, "int main() { return 0; }\n").unwrap();

        let stats_path = write_native_stats(&out_dir, &scratch, &input);
        let runner = VersionRunner(
            "perses version 1.6\nGit Version deadbeefcafe\n".to_string(),
        );

        let stats = perses()
            .normalize_report(&runner, &stats_path, &input, &out_dir, &scratch)
            .unwrap();

        assert_eq!(stats.runtime, 12.82);
        assert_eq!(stats.tests_started, 124);
        assert_eq!(stats.iterations, Some(3));
        assert_eq!(stats.tests_passed, 40);
        assert_eq!(stats.tests_failed, 84);
        // máximo del pqcm: 19000 bytes
        assert_eq!(stats.cache_kbytes, 18.55);
        assert_eq!(stats.reducer, "perses-1.6-deadbee");
        assert_eq!(stats.path_output, out_dir.join("small.c").display().to_string());
        assert_eq!(stats.bytes_output, 7);
        // "int" + "a;" = 5
        assert_eq!(stats.nws_output, 5);
        assert!(stats.peak_memory_kbytes.is_none());
    }

    #[test]
    fn normalizar_borra_los_subproductos_orig() {
        let tmp = temp_dir("orig");
        let out_dir = tmp.join("out");
        let scratch = tmp.join("scratch");
        fs::create_dir_all(&out_dir).unwrap();
        fs::create_dir_all(&scratch).unwrap();

        let input = tmp.join("small.c");
        fs::write(&input, "int main() {}\n").unwrap();
        fs::write(tmp.join("small.1700000000.orig"), "").unwrap();

        let stats_path = write_native_stats(&out_dir, &scratch, &input);
        let runner = VersionRunner("perses version 1.6\n".to_string());

        perses()
            .normalize_report(&runner, &stats_path, &input, &out_dir, &scratch)
            .unwrap();

        assert!(!tmp.join("small.1700000000.orig").exists());
    }

    #[test]
    fn sondeo_de_version_fallido_no_bloquea() {
        let tmp = temp_dir("version_fallida");
        let out_dir = tmp.join("out");
        let scratch = tmp.join("scratch");
        fs::create_dir_all(&out_dir).unwrap();
        fs::create_dir_all(&scratch).unwrap();

        let input = tmp.join("small.c");
        fs::write(&input, "int main() {}\n").unwrap();

        let stats_path = write_native_stats(&out_dir, &scratch, &input);

        let stats = perses()
            .normalize_report(&FailingRunner, &stats_path, &input, &out_dir, &scratch)
            .unwrap();

        assert_eq!(stats.reducer, "perses-unknown");
    }
}
