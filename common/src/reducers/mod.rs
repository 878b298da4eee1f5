use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::report::ReductionStats;
use crate::runner::CommandRunner;

mod grammars;
mod perses;
mod picire;
mod picireny;

pub use grammars::grammar_for;
pub use perses::Perses;
pub use picire::{Atom, Picire};
pub use picireny::Picireny;

/// Opciones comunes de los reductores de delta debugging (picire/picireny).
#[derive(Debug, Clone)]
pub struct DdOptions {
    /// Iteración a punto fijo de DDMin.
    pub dd_star: bool,
    /// Estrategia de caché interna del reductor.
    pub cache: String,
    pub cache_fail: bool,
    pub evict_after_fail: bool,
    pub parallel: bool,
    pub jobs: usize,
}

/// Variante etiquetada sobre los reductores soportados. Cada una expone el
/// mismo par de capacidades: construir el comando y normalizar su reporte.
pub enum Reducer {
    Perses(Perses),
    Picire(Picire),
    Picireny(Picireny),
}

impl Reducer {
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Perses(_) => "perses",
            Reducer::Picire(_) => "picire",
            Reducer::Picireny(_) => "picireny",
        }
    }

    /// Nombre del archivo de estadísticas dentro del directorio de salida.
    pub fn stats_file_name(&self) -> String {
        format!("{}.json", self.name())
    }

    /// Vector de argumentos exacto para reducir (oracle, input), dejando los
    /// artefactos intermedios en scratch y las estadísticas en stats.
    /// Sin interpretación de shell: los argumentos van como vector.
    pub fn build_command(
        &self,
        oracle: &Path,
        input: &Path,
        scratch: &Path,
        stats: &Path,
    ) -> Result<Vec<String>> {
        match self {
            Reducer::Perses(r) => r.build_command(oracle, input, scratch, stats),
            Reducer::Picire(r) => r.build_command(oracle, input, scratch, stats),
            Reducer::Picireny(r) => r.build_command(oracle, input, scratch, stats),
        }
    }

    /// Convierte el artefacto nativo de estadísticas del reductor en el
    /// registro canónico, copiando el resultado reducido al directorio final.
    pub fn normalize_report(
        &self,
        runner: &dyn CommandRunner,
        stats_path: &Path,
        input: &Path,
        out_dir: &Path,
        scratch: &Path,
    ) -> Result<ReductionStats> {
        match self {
            Reducer::Perses(r) => r.normalize_report(runner, stats_path, input, out_dir, scratch),
            Reducer::Picire(r) => r.normalize_report(runner, stats_path, input, out_dir, scratch),
            Reducer::Picireny(r) => r.normalize_report(runner, stats_path, input, out_dir, scratch),
        }
    }
}

/// Argumentos compartidos por picire y picireny, compuestos explícitamente
/// en lugar de heredados.
pub(crate) fn dd_common_args(
    dd: &DdOptions,
    oracle: &Path,
    input: &Path,
    scratch: &Path,
    stats: &Path,
) -> Vec<String> {
    let mut args = vec![
        "--test".to_string(),
        oracle.display().to_string(),
        "--input".to_string(),
        input.display().to_string(),
        "--out".to_string(),
        scratch.display().to_string(),
        "--cache".to_string(),
        dd.cache.clone(),
    ];

    if dd.cache_fail {
        args.push("--cache-fail".to_string());
    }
    if !dd.evict_after_fail {
        args.push("--no-cache-evict-after-fail".to_string());
    }
    if dd.dd_star {
        args.push("--dd-star".to_string());
    }
    if dd.parallel {
        args.push("--parallel".to_string());
        args.push("--jobs".to_string());
        args.push(dd.jobs.to_string());
    }

    args.push("--statistics".to_string());
    args.push("--stat-file".to_string());
    args.push(stats.display().to_string());

    args
}

/// Sondea `<herramienta> --version` y devuelve "<nombre>-<versión>".
/// Un sondeo fallido nunca bloquea la normalización: cae a "<nombre>-unknown".
pub(crate) fn probe_version(
    runner: &dyn CommandRunner,
    tool: &str,
    cwd: &Path,
) -> String {
    let argv = vec![tool.to_string(), "--version".to_string()];

    match runner.run(&argv, cwd, &[]) {
        Ok((0, stdout)) => {
            let token = stdout
                .split_whitespace()
                .last()
                .unwrap_or("unknown")
                .to_string();
            format!("{tool}-{token}")
        }
        _ => format!("{tool}-unknown"),
    }
}

/// Borra los subproductos "<stem>.<timestamp>.orig" que algunos reductores
/// dejan junto al archivo de entrada original. Que no existan no es un error.
pub(crate) fn remove_orig_leftovers(input: &Path) {
    let Some(parent) = input.parent() else { return };
    let Some(stem) = input.file_stem().and_then(|s| s.to_str()) else { return };

    let pattern = parent.join(format!("{stem}.*.orig"));
    if let Ok(paths) = glob::glob(&pattern.display().to_string()) {
        for path in paths.flatten() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Copia el archivo reducido de scratch al directorio final y devuelve
/// su ruta definitiva.
pub(crate) fn promote_reduced(
    input: &Path,
    scratch: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    use anyhow::Context;

    let name = input
        .file_name()
        .context("el archivo de entrada no tiene nombre")?;
    let reduced = scratch.join(name);
    let destination = out_dir.join(name);

    std::fs::copy(&reduced, &destination).with_context(|| {
        format!(
            "no se pudo copiar {} a {}",
            reduced.display(),
            destination.display()
        )
    })?;

    Ok(destination)
}
