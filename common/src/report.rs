use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Registro canónico de una reducción completada.
/// Los nombres serializados son los mismos que usan los reportes en disco,
/// así que una pasada serializar → parsear devuelve el registro idéntico.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionStats {
    /// Identidad/versión del reductor (p.ej. "perses-1.6-ab12cd3").
    pub reducer: String,
    /// Tiempo de pared en segundos.
    pub runtime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,
    pub tests_started: u64,
    pub tests_passed: u64,
    pub tests_failed: u64,
    #[serde(rename = "cache_size (kbytes)")]
    pub cache_kbytes: f64,
    pub path_input: String,
    pub path_output: String,
    pub bytes_input: u64,
    pub bytes_output: u64,
    /// Tamaño en "palabras no separadas por blancos": suma de longitudes
    /// de tokens, independiente del modelo interno de cada reductor.
    pub nws_input: u64,
    pub nws_output: u64,
    #[serde(rename = "peak_memory (kbytes)", skip_serializing_if = "Option::is_none")]
    pub peak_memory_kbytes: Option<f64>,
}

/// Lee un registro de estadísticas persistido. Solo JSON.
pub fn read_stats(path: &Path) -> Result<Value> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        bail!("solo se soporta el formato JSON ({})", path.display());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("no se pudo parsear {}", path.display()))?;

    Ok(value)
}

/// Escribe un reporte JSON con indentado de 4 y claves ordenadas.
/// (El Map de serde_json ya mantiene las claves ordenadas.)
pub fn dump_stats(value: &Value, path: &Path) -> Result<()> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        bail!("solo se soporta el formato JSON ({})", path.display());
    }

    let file = File::create(path)
        .with_context(|| format!("no se pudo crear {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
    value.serialize(&mut serializer)?;

    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Métrica "nws": suma de longitudes de los tokens separados por blancos.
pub fn nws_size(path: &Path) -> Result<u64> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer {}", path.display()))?;

    Ok(contents
        .split_whitespace()
        .map(|word| word.len() as u64)
        .sum())
}

/// Bytes → kilobytes redondeado a dos decimales.
pub fn kbytes(bytes: u64) -> f64 {
    round2(bytes as f64 / 1024.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
