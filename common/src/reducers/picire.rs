use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::report::{kbytes, nws_size, round2, ReductionStats};
use crate::runner::CommandRunner;

use super::{dd_common_args, probe_version, promote_reduced, DdOptions};

/// Granularidad del átomo de entrada de picire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atom {
    Char,
    Line,
    Both,
}

impl Atom {
    pub fn as_str(&self) -> &'static str {
        match self {
            Atom::Char => "char",
            Atom::Line => "line",
            Atom::Both => "both",
        }
    }
}

/// Reductor picire: delta debugging plano sobre líneas o caracteres.
pub struct Picire {
    pub atom: Atom,
    pub dd: DdOptions,
}

impl Picire {
    pub fn build_command(
        &self,
        oracle: &Path,
        input: &Path,
        scratch: &Path,
        stats: &Path,
    ) -> Result<Vec<String>> {
        let mut command = vec![
            "picire".to_string(),
            "--atom".to_string(),
            self.atom.as_str().to_string(),
        ];
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
        normalize_dd_stats("picire", runner, stats_path, input, out_dir, scratch)
    }
}

/// Normalización compartida por picire y picireny: ambos escriben sus
/// estadísticas nativas como JSON con el mismo conjunto de contadores.
pub(crate) fn normalize_dd_stats(
    tool: &str,
    runner: &dyn CommandRunner,
    stats_path: &Path,
    input: &Path,
    out_dir: &Path,
    scratch: &Path,
) -> Result<ReductionStats> {
    let native = crate::report::read_stats(stats_path)?;

    let counter = |key: &str| -> Result<u64> {
        native
            .get(key)
            .and_then(|v| v.as_u64())
            .with_context(|| format!("falta el contador '{key}' en {}", stats_path.display()))
    };

    let runtime = native
        .get("runtime")
        .and_then(|v| v.as_f64())
        .with_context(|| format!("falta 'runtime' en {}", stats_path.display()))?;

    let cache_size = counter("cache_size")?;

    let destination = promote_reduced(input, scratch, out_dir)?;

    Ok(ReductionStats {
        reducer: probe_version(runner, tool, scratch),
        runtime: round2(runtime),
        iterations: native.get("iterations").and_then(|v| v.as_u64()),
        tests_started: counter("tests_started")?,
        tests_passed: counter("tests_passed")?,
        tests_failed: counter("tests_failed")?,
        cache_kbytes: kbytes(cache_size),
        path_input: input.display().to_string(),
        path_output: destination.display().to_string(),
        bytes_input: fs::metadata(input)?.len(),
        bytes_output: fs::metadata(&destination)?.len(),
        nws_input: nws_size(input)?,
        nws_output: nws_size(&destination)?,
        peak_memory_kbytes: None,
    })
}
