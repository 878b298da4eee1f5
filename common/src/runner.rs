use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Contrato de invocación de herramientas externas: vector de argumentos
/// de entrada, (código de salida, stdout+stderr) de salida.
/// En tests se sustituye por un runner falso sin procesos reales.
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String], cwd: &Path, extra_env: &[(String, String)]) -> Result<(i32, String)>;
}

/// Runner real: lanza exactamente un proceso hijo y espera a que termine.
/// Sin reintentos ni timeout; esa política pertenece al llamador.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], cwd: &Path, extra_env: &[(String, String)]) -> Result<(i32, String)> {
        debug!("ejecutando: {}", argv.join(" "));

        let (program, args) = argv
            .split_first()
            .context("el vector de argumentos está vacío")?;

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .envs(extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .with_context(|| format!("no se pudo lanzar {program}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // -1 cuando el hijo murió por señal y no hay código de salida
        let exit_code = output.status.code().unwrap_or(-1);

        Ok((exit_code, format!("{stdout} {stderr}")))
    }
}
