use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::report::round2;
use crate::runner::CommandRunner;

/// Herramienta externa con la que se mide el pico de memoria del reductor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTool {
    /// valgrind --tool=massif: perfilador de heap, resumen vía ms_print.
    Massif,
    /// /usr/bin/time -f %M: pico de memoria residente en kilobytes.
    Time,
}

/// Violación del invariante de contabilidad: el pico del árbol de procesos
/// del reductor nunca puede ser menor que lo ya atribuido al SUT. Señala un
/// bug en el mecanismo de medición, no un fallo del reductor, y por eso se
/// distingue del resto de errores.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryAccountingError {
    pub total_kbytes: f64,
    pub sut_kbytes: f64,
}

impl fmt::Display for MemoryAccountingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "contabilidad de memoria inconsistente: total medido {} kb < {} kb atribuidos al SUT",
            self.total_kbytes, self.sut_kbytes
        )
    }
}

impl std::error::Error for MemoryAccountingError {}

/// Pico de memoria ya atribuido al reductor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakMeasurement {
    pub kbytes: f64,
    /// true cuando el SUT dominó la ventana de medición completa y se
    /// reporta su propio pico en lugar de cero.
    pub sut_dominated: bool,
}

/// Plantilla del wrapper del oráculo (independiente del reductor).
/// Mide el pico del SUT con /usr/bin/time, acumula el valor en un archivo
/// compartido bajo flock y sale con el código del oráculo delegado.
const WRAPPER_TEMPLATE: &str = r#"#!/bin/sh
# Wrapper generado: mide el pico de memoria del SUT y lo acumula.
RAW="@SCRATCH@/sut-mem-$$.out"
/usr/bin/time -f %M -o "$RAW" "@ORACLE@" "$@"
STATUS=$?

(
    flock -x 9
    ACC=0
    if [ -s "@ACC@" ]; then
        ACC=$(cat "@ACC@")
    fi
    CUR=$(tail -n 1 "$RAW" 2>/dev/null || echo 0)
    echo $((ACC + CUR)) > "@ACC@"
    rm -f "$RAW"
) 9>> "@LOCK@"

exit $STATUS
"#;

/// Aísla el pico de memoria del reductor del consumido por el programa
/// bajo prueba que el propio oráculo lanza en cada chequeo.
pub struct PeakMemory {
    tool: MemoryTool,
    scratch: PathBuf,
    snapshot: PathBuf,
    lock_file: PathBuf,
    acc_file: PathBuf,
}

impl PeakMemory {
    pub fn new(tool: MemoryTool, scratch: &Path) -> Self {
        let snapshot = match tool {
            MemoryTool::Massif => scratch.join("valgrind.out"),
            MemoryTool::Time => scratch.join("time.out"),
        };

        Self {
            tool,
            scratch: scratch.to_path_buf(),
            snapshot,
            lock_file: scratch.join("redubear-mem.lock"),
            acc_file: scratch.join("redubear-mem.acc"),
        }
    }

    /// Prefijo con el que se envuelve la invocación completa del reductor.
    pub fn profiler_prefix(&self) -> Vec<String> {
        match self.tool {
            MemoryTool::Massif => vec![
                "valgrind".to_string(),
                "--tool=massif".to_string(),
                "--stacks=yes".to_string(),
                "--trace-children=no".to_string(),
                "--pages-as-heap=no".to_string(),
                "--quiet".to_string(),
                format!("--massif-out-file={}", self.snapshot.display()),
            ],
            MemoryTool::Time => vec![
                "/usr/bin/time".to_string(),
                "-f".to_string(),
                "%M".to_string(),
                "-o".to_string(),
                self.snapshot.display().to_string(),
            ],
        }
    }

    /// Genera el wrapper del oráculo en `wrapper_path` y lo hace ejecutable.
    /// El wrapper conserva el código de salida del oráculo delegado, así que
    /// el test de interés del reductor no cambia semánticamente.
    pub fn wrap_oracle(&self, oracle: &Path, wrapper_path: &Path) -> Result<PathBuf> {
        let script = WRAPPER_TEMPLATE
            .replace("@ORACLE@", &oracle.display().to_string())
            .replace("@SCRATCH@", &self.scratch.display().to_string())
            .replace("@ACC@", &self.acc_file.display().to_string())
            .replace("@LOCK@", &self.lock_file.display().to_string());

        fs::write(wrapper_path, script)
            .with_context(|| format!("no se pudo escribir {}", wrapper_path.display()))?;

        let mut perms = fs::metadata(wrapper_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(wrapper_path, perms)?;

        Ok(wrapper_path.to_path_buf())
    }

    /// Lee las mediciones una vez terminado el reductor y atribuye el pico.
    pub fn collect(&self, runner: &dyn CommandRunner) -> Result<PeakMeasurement> {
        let total = match self.tool {
            MemoryTool::Time => self.read_time_snapshot()?,
            MemoryTool::Massif => self.read_massif_snapshot(runner)?,
        };

        let sut = self.read_accumulated()?;
        attribute(total, sut)
    }

    /// Última línea del archivo -o de /usr/bin/time: pico RSS en kilobytes.
    fn read_time_snapshot(&self) -> Result<f64> {
        let contents = fs::read_to_string(&self.snapshot)
            .with_context(|| format!("no se pudo leer {}", self.snapshot.display()))?;

        let last = contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .last()
            .context("la instantánea de /usr/bin/time está vacía")?;

        last.trim()
            .parse::<f64>()
            .with_context(|| format!("pico de memoria ilegible: '{last}'"))
    }

    /// Resumen de ms_print: la línea 8 del gráfico lleva el pico en MB como
    /// primer campo numérico, terminado en '^'.
    fn read_massif_snapshot(&self, runner: &dyn CommandRunner) -> Result<f64> {
        let argv = vec![
            "ms_print".to_string(),
            self.snapshot.display().to_string(),
        ];
        let cwd = self
            .snapshot
            .parent()
            .context("la instantánea de massif no tiene directorio padre")?;

        let (exit_code, stdout) = runner.run(&argv, cwd, &[])?;
        if exit_code != 0 {
            error!("{stdout}");
            bail!("ms_print terminó con código {exit_code}");
        }

        let line = stdout
            .lines()
            .nth(8)
            .context("la salida de ms_print es demasiado corta")?;
        let peak_mb = line
            .split('^')
            .next()
            .unwrap_or("")
            .trim()
            .parse::<f64>()
            .with_context(|| format!("pico de massif ilegible: '{line}'"))?;

        // ms_print reporta MB; el resto del sistema trabaja en kilobytes
        Ok(peak_mb * 1024.0)
    }

    /// Valor acumulado por el wrapper; ausente o vacío cuenta como cero.
    fn read_accumulated(&self) -> Result<f64> {
        let contents = match fs::read_to_string(&self.acc_file) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0.0),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("no se pudo leer {}", self.acc_file.display())
                })
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(0.0);
        }

        trimmed
            .parse::<f64>()
            .with_context(|| format!("acumulado de memoria ilegible: '{trimmed}'"))
    }
}

/// Atribuye el pico al reductor restando lo medido para el SUT.
/// - diferencia positiva: es el pico propio del reductor;
/// - exactamente cero: el SUT dominó la ventana completa, se reporta su
///   propio pico con un aviso, nunca cero;
/// - negativa: violación del invariante de medición, error fatal.
pub fn attribute(total_kbytes: f64, sut_kbytes: f64) -> Result<PeakMeasurement> {
    let diff = total_kbytes - sut_kbytes;

    if diff < 0.0 {
        return Err(MemoryAccountingError {
            total_kbytes,
            sut_kbytes,
        }
        .into());
    }

    if diff == 0.0 {
        warn!(
            "el SUT dominó la medición completa ({sut_kbytes} kb), se reporta su pico en lugar de cero"
        );
        return Ok(PeakMeasurement {
            kbytes: round2(sut_kbytes),
            sut_dominated: true,
        });
    }

    Ok(PeakMeasurement {
        kbytes: round2(diff),
        sut_dominated: false,
    })
}
