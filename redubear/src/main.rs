mod benchmark;
mod cli;

use anyhow::Result;
use clap::Parser;
use common::{dump_stats, Suite, SystemRunner};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .init();

    // La selección se resuelve y valida completa antes de planificar nada:
    // un catálogo mal configurado aborta la ejecución entera.
    let suite = Suite::new(
        cli.benchmark.as_deref(),
        cli.jrts_root.as_deref(),
        cli.perses_root.as_deref(),
        cli.custom_oracle.as_deref(),
        cli.custom_input.as_deref(),
    )?;
    let cases = suite.resolve()?;

    let workers = cli.effective_workers();
    let memory = cli.memory_tool();
    let reducer = cli.reducer.into_reducer()?;

    info!("{} casos a reducir con {} workers", cases.len(), workers);

    let executor = benchmark::Benchmark::new(
        cases,
        reducer,
        Arc::new(SystemRunner),
        &cli.tag,
        workers,
        memory,
        cli.force,
        &cli.output,
        &cli.temp,
    );
    let report = executor.run().await?;

    let report_file = cli.output.join(format!("ReduBear-{}.json", cli.tag));
    dump_stats(&Value::Object(report), &report_file)?;
    info!("reporte agregado escrito en {}", report_file.display());

    Ok(())
}
