use anyhow::{Context, Result};
use chrono::Local;
use common::{dump_stats, read_stats, CommandRunner, MemoryTool, PeakMemory, Reducer, TestCase};
use serde_json::{json, Map, Value};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Máquina de estados de un job:
/// Pending → (CacheHit | Running) → (Completed | Failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    CacheHit,
    Running,
    Completed,
    Failed,
}

/// Parámetros de un job concreto (un caso del catálogo + la etiqueta).
struct Job {
    case: TestCase,
    tag: String,
    memory: Option<MemoryTool>,
    force: bool,
    output: PathBuf,
    temp: PathBuf,
}

/// Ejecutor del benchmark: pool acotado de workers sobre jobs
/// independientes, un job por caso del catálogo.
pub struct Benchmark {
    cases: Vec<TestCase>,
    reducer: Arc<Reducer>,
    runner: Arc<dyn CommandRunner>,
    tag: String,
    workers: usize,
    memory: Option<MemoryTool>,
    force: bool,
    output: PathBuf,
    temp: PathBuf,
}

impl Benchmark {
    pub fn new(
        cases: Vec<TestCase>,
        reducer: Reducer,
        runner: Arc<dyn CommandRunner>,
        tag: &str,
        workers: usize,
        memory: Option<MemoryTool>,
        force: bool,
        output: &Path,
        temp: &Path,
    ) -> Self {
        Self {
            cases,
            reducer: Arc::new(reducer),
            runner,
            tag: tag.to_string(),
            workers,
            memory,
            force,
            output: output.to_path_buf(),
            temp: temp.to_path_buf(),
        }
    }

    /// Ejecuta todos los jobs y devuelve el reporte agregado
    /// (nombre del caso → registro de resultado). El reporte se arma solo
    /// cuando todos los jobs alcanzaron un estado terminal; el fallo de un
    /// job nunca aborta a sus hermanos.
    pub async fn run(&self) -> Result<Map<String, Value>> {
        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let start = Instant::now();

        let mut handles = Vec::with_capacity(self.cases.len());
        for case in &self.cases {
            let semaphore = semaphore.clone();
            let reducer = self.reducer.clone();
            let runner = self.runner.clone();
            let job = Job {
                case: case.clone(),
                tag: self.tag.clone(),
                memory: self.memory,
                force: self.force,
                output: self.output.clone(),
                temp: self.temp.clone(),
            };

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("el semáforo del pool se cerró");

                tokio::task::spawn_blocking(move || {
                    let name = job.case.name.clone();
                    run_single(&job, &reducer, runner.as_ref())
                        .with_context(|| format!("el job {name} falló internamente"))
                })
                .await
            }));
        }

        let mut report = Map::new();
        let mut fatal: Option<anyhow::Error> = None;
        let (mut completed, mut cached, mut failed) = (0, 0, 0);

        for handle in handles {
            match handle.await {
                Ok(Ok(Ok((name, status, value)))) => {
                    match status {
                        JobStatus::CacheHit => cached += 1,
                        JobStatus::Failed => failed += 1,
                        _ => completed += 1,
                    }
                    report.insert(name, value);
                }
                // Error interno del job (contabilidad de memoria,
                // normalización): se re-lanza cuando ya terminaron todos.
                Ok(Ok(Err(e))) => {
                    error!("{e:#}");
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Ok(Err(e)) => {
                    error!("un job del pool terminó en panic: {e}");
                    if fatal.is_none() {
                        fatal = Some(e.into());
                    }
                }
                Err(e) => {
                    error!("no se pudo esperar un job del pool: {e}");
                    if fatal.is_none() {
                        fatal = Some(e.into());
                    }
                }
            }
        }

        info!(
            "benchmark terminado en {:.1?}: {completed} completados, {cached} cacheados, {failed} fallidos",
            start.elapsed()
        );

        if let Some(e) = fatal {
            return Err(e);
        }

        Ok(report)
    }
}

/// Ejecuta un job hasta su estado terminal. El directorio scratch es
/// propiedad exclusiva del job y se borra en toda salida de Running.
fn run_single(
    job: &Job,
    reducer: &Reducer,
    runner: &dyn CommandRunner,
) -> Result<(String, JobStatus, Value)> {
    let name = &job.case.name;

    let out_dir = job.output.join(name).join(&job.tag);
    let scratch = job.temp.join("redubear").join(name).join(&job.tag);
    let stats_path = out_dir.join(reducer.stats_file_name());
    let reduced_path = out_dir.join(
        job.case
            .input
            .file_name()
            .context("el archivo de entrada no tiene nombre")?,
    );

    // Pending → CacheHit: resultado previo completo con la misma etiqueta
    if !job.force && stats_path.is_file() && reduced_path.is_file() {
        info!("[{}] {name}: resultado cacheado, se reutiliza", timestamp());
        let value = read_stats(&stats_path)?;
        return Ok((name.clone(), JobStatus::CacheHit, value));
    }

    info!("[{}] {name} arrancó ...", timestamp());

    fs::create_dir_all(&out_dir)
        .with_context(|| format!("no se pudo crear {}", out_dir.display()))?;
    fs::create_dir_all(&scratch)
        .with_context(|| format!("no se pudo crear {}", scratch.display()))?;

    let result = execute(job, reducer, runner, &out_dir, &scratch, &stats_path);

    // scratch nunca se reutiliza entre intentos
    let _ = fs::remove_dir_all(&scratch);

    let (status, value) = result?;
    Ok((name.clone(), status, value))
}

/// Running → (Completed | Failed).
fn execute(
    job: &Job,
    reducer: &Reducer,
    runner: &dyn CommandRunner,
    out_dir: &Path,
    scratch: &Path,
    stats_path: &Path,
) -> Result<(JobStatus, Value)> {
    let name = &job.case.name;

    let mut command = Vec::new();
    let mut oracle = job.case.oracle.clone();
    let mut peak = None;

    if let Some(tool) = job.memory {
        let pm = PeakMemory::new(tool, scratch);
        command.extend(pm.profiler_prefix());
        oracle = pm.wrap_oracle(&job.case.oracle, &scratch.join("redubear-wrapper.sh"))?;
        peak = Some(pm);
    }

    command.extend(reducer.build_command(&oracle, &job.case.input, scratch, stats_path)?);

    let cwd = oracle
        .parent()
        .context("el oráculo no tiene directorio padre")?;
    let env = [("PYTHONOPTIMIZE".to_string(), "1".to_string())];

    let (exit_code, output) = runner.run(&command, cwd, &env)?;
    info!("[{}] {name} terminó con código {exit_code}", timestamp());

    if exit_code != 0 {
        error!("{output}");
        return Ok((JobStatus::Failed, json!({ "error": exit_code })));
    }

    let mut stats =
        reducer.normalize_report(runner, stats_path, &job.case.input, out_dir, scratch)?;

    if let Some(pm) = &peak {
        let measured = pm.collect(runner)?;
        stats.peak_memory_kbytes = Some(measured.kbytes);
    }

    let value = serde_json::to_value(&stats)?;
    dump_stats(&value, stats_path)?;

    Ok((JobStatus::Completed, value))
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Atom, DdOptions, Picire};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::{env, fs};

    /// Reductor falso: se comporta como picire sin lanzar procesos reales.
    /// Deja el archivo reducido en scratch y las estadísticas nativas en
    /// el stat-file; falla cuando el nombre de la entrada contiene "fail".
    struct FakeRunner {
        calls: AtomicUsize,
    }

    impl FakeRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, argv: &[String], _: &Path, _: &[(String, String)]) -> Result<(i32, String)> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if argv.iter().any(|a| a == "--version") {
                return Ok((0, "picire 21.8\n".to_string()));
            }

            let value_of = |flag: &str| {
                argv.iter()
                    .position(|a| a == flag)
                    .map(|i| argv[i + 1].clone())
            };

            let input = PathBuf::from(value_of("--input").unwrap());
            if input.to_string_lossy().contains("fail") {
                return Ok((1, "la reducción explotó".to_string()));
            }

            let scratch = PathBuf::from(value_of("--out").unwrap());
            let stats = PathBuf::from(value_of("--stat-file").unwrap());

            fs::write(scratch.join(input.file_name().unwrap()), "x\n").unwrap();
            fs::write(
                &stats,
                json!({
                    "runtime": 1.5,
                    "tests_started": 10,
                    "tests_passed": 4,
                    "tests_failed": 6,
                    "cache_size": 1024,
                })
                .to_string(),
            )
            .unwrap();

            Ok((0, String::new()))
        }
    }

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("benchmark_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    /// Casos de prueba con oráculo y entrada reales en disco.
    fn make_cases(base: &Path, names: &[&str]) -> Vec<TestCase> {
        names
            .iter()
            .map(|name| {
                let dir = base.join("suite").join(name);
                fs::create_dir_all(&dir).unwrap();
                let oracle = dir.join("test.sh");
                let input = dir.join(format!("{name}.js"));
                fs::write(&oracle, "#!/bin/sh\nexit 0\n").unwrap();
                fs::write(&input, "var x = 1;\n").unwrap();
                TestCase { name: name.to_string(), oracle, input }
            })
            .collect()
    }

    fn picire_reducer() -> Reducer {
        Reducer::Picire(Picire {
            atom: Atom::Line,
            dd: DdOptions {
                dd_star: false,
                cache: "config".to_string(),
                cache_fail: false,
                evict_after_fail: true,
                parallel: false,
                jobs: 1,
            },
        })
    }

    fn benchmark(
        base: &Path,
        cases: Vec<TestCase>,
        runner: Arc<FakeRunner>,
        workers: usize,
        force: bool,
    ) -> Benchmark {
        Benchmark::new(
            cases,
            picire_reducer(),
            runner,
            "t1",
            workers,
            None,
            force,
            &base.join("out"),
            &base.join("tmp"),
        )
    }

    #[tokio::test]
    async fn tres_tareas_una_falla_y_el_reporte_tiene_tres_claves() {
        let base = temp_dir("tres_tareas");
        let cases = make_cases(&base, &["caso-a", "caso-fail", "caso-c"]);
        let runner = FakeRunner::new();

        let report = benchmark(&base, cases, runner, 2, false)
            .run()
            .await
            .unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(report["caso-fail"], json!({ "error": 1 }));
        assert!(report["caso-a"].get("reducer").is_some());
        assert!(report["caso-c"].get("reducer").is_some());
    }

    #[tokio::test]
    async fn el_reporte_es_igual_con_cualquier_tamano_de_pool() {
        for workers in [1, 2, 5] {
            let base = temp_dir(&format!("pool_{workers}"));
            let cases = make_cases(&base, &["caso-a", "caso-b", "caso-c"]);
            let runner = FakeRunner::new();

            let report = benchmark(&base, cases, runner, workers, false)
                .run()
                .await
                .unwrap();

            let keys: Vec<&String> = report.keys().collect();
            assert_eq!(keys, vec!["caso-a", "caso-b", "caso-c"]);
        }
    }

    #[tokio::test]
    async fn la_cache_evita_lanzar_procesos_y_repite_el_registro() {
        let base = temp_dir("cache");
        let cases = make_cases(&base, &["caso-a"]);
        let runner = FakeRunner::new();

        let first = benchmark(&base, cases.clone(), runner.clone(), 1, false)
            .run()
            .await
            .unwrap();
        let calls_first = runner.calls();
        let stats_file = base.join("out").join("caso-a").join("t1").join("picire.json");
        let bytes_first = fs::read(&stats_file).unwrap();

        let second = benchmark(&base, cases, runner.clone(), 1, false)
            .run()
            .await
            .unwrap();

        // cero subprocesos nuevos y registro byte a byte idéntico
        assert_eq!(runner.calls(), calls_first);
        assert_eq!(second, first);
        assert_eq!(fs::read(&stats_file).unwrap(), bytes_first);
    }

    #[tokio::test]
    async fn force_vuelve_a_ejecutar_aunque_haya_cache() {
        let base = temp_dir("force");
        let cases = make_cases(&base, &["caso-a"]);
        let runner = FakeRunner::new();

        benchmark(&base, cases.clone(), runner.clone(), 1, false)
            .run()
            .await
            .unwrap();
        let calls_first = runner.calls();

        benchmark(&base, cases, runner.clone(), 1, true)
            .run()
            .await
            .unwrap();

        assert!(runner.calls() > calls_first);
    }

    #[tokio::test]
    async fn el_scratch_desaparece_tras_exito_y_tras_fallo() {
        let base = temp_dir("scratch");
        let cases = make_cases(&base, &["caso-a", "caso-fail"]);
        let runner = FakeRunner::new();

        benchmark(&base, cases, runner, 2, false).run().await.unwrap();

        assert!(!base.join("tmp").join("redubear").join("caso-a").join("t1").exists());
        assert!(!base.join("tmp").join("redubear").join("caso-fail").join("t1").exists());
    }

    #[tokio::test]
    async fn el_registro_normalizado_queda_persistido_en_la_salida() {
        let base = temp_dir("persistido");
        let cases = make_cases(&base, &["caso-a"]);
        let runner = FakeRunner::new();

        let report = benchmark(&base, cases, runner, 1, false)
            .run()
            .await
            .unwrap();

        let out_dir = base.join("out").join("caso-a").join("t1");
        let persisted = read_stats(&out_dir.join("picire.json")).unwrap();
        assert_eq!(persisted, report["caso-a"]);
        // el archivo reducido quedó promovido junto a las estadísticas
        assert_eq!(fs::read_to_string(out_dir.join("caso-a.js")).unwrap(), "x\n");
    }
}
