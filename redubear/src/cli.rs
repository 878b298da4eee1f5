use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{Atom, DdOptions, MemoryTool, Perses, Picire, Picireny, Reducer};
use std::path::PathBuf;
use sysinfo::{System, SystemExt};

/// Banco de pruebas para reductores de casos de test (delta debugging).
/// Cada subcomando corresponde a un reductor externo con sus opciones.
#[derive(Parser)]
#[command(name = "redubear")]
#[command(about = "Benchmark de reductores de casos de regresión")]
pub struct Cli {
    /// Etiqueta única de la medición (particiona la caché de resultados)
    #[arg(short = 't', long, value_name = "UNIQUE_TAG")]
    pub tag: String,

    /// Directorio de salida donde se guardan los casos reducidos
    #[arg(short = 'o', long, default_value = "experiments")]
    pub output: PathBuf,

    /// Número de workers para reducir los tests en paralelo
    /// (default: la mitad de las unidades de proceso)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Medir el pico de memoria del reductor excluyendo el SUT
    #[arg(short = 'm', long)]
    pub memory: bool,

    /// Herramienta de medición de memoria
    #[arg(long, default_value = "time", value_parser = ["time", "massif"])]
    pub memory_tool: String,

    /// Directorio temporal para los archivos intermedios de los reductores
    /// (se borra al terminar cada job)
    #[arg(long, default_value = "/tmp/reduction")]
    pub temp: PathBuf,

    /// Volver a ejecutar aunque exista un resultado cacheado
    #[arg(long)]
    pub force: bool,

    /// Verbosidad de los mensajes de diagnóstico
    #[arg(long, default_value = "error", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    /* --------- Selección de benchmarks --------- */

    /// Raíz de la JerryScript Reduction Test Suite (<proyecto>/tests)
    #[arg(long)]
    pub jrts_root: Option<PathBuf>,

    /// Raíz de la Perses Test Suite (<proyecto>/benchmark)
    #[arg(long)]
    pub perses_root: Option<PathBuf>,

    /// Caso a reducir: nombre exacto o grupo ("jerry", "clang", "gcc")
    #[arg(long)]
    pub benchmark: Option<String>,

    /// Script oráculo custom para --custom-input (excluye --benchmark)
    #[arg(long)]
    pub custom_oracle: Option<PathBuf>,

    /// Archivo de entrada custom a reducir (excluye --benchmark)
    #[arg(long)]
    pub custom_input: Option<PathBuf>,

    #[command(subcommand)]
    pub reducer: ReducerCommand,
}

#[derive(Subcommand)]
pub enum ReducerCommand {
    /// Argumentos del reductor Perses
    Perses {
        /// Jar precompilado de Perses
        #[arg(long, required = true)]
        jar: PathBuf,

        /// Jar precompilado del explorador de objetos (javaagent)
        #[arg(long, required = true)]
        object_explorer: PathBuf,

        /// Máximo de tests de interés ejecutados en paralelo
        #[arg(short = 'j', long, default_value_t = 1)]
        jobs: usize,

        /// Estrategia de caché de queries
        #[arg(long, default_value = "COMPACT_QUERY_CACHE", value_parser = [
            "COMPACT_QUERY_CACHE", "COMPACT_QUERY_CACHE_FORMAT_SENSITIVE",
            "CONFIG_BASED", "CONTENT_LEXEME_LIST_BASE", "CONTENT_SHA512",
            "CONTENT_SHA512_FORMAT", "CONTENT_ZIP", "ORIG_CONTENT_STRING_BASED",
            "PERSES_FAST_LINEAR_SCAN_NO_COMPRESSION", "PERSES_LEXEME_ID", "RCC_MEM_LIT",
        ])]
        cache: String,
    },

    /// Argumentos del reductor Picire
    Picire {
        /// Átomo (granularidad) de la entrada
        #[arg(long, default_value = "line", value_parser = ["char", "line", "both"])]
        atom: String,

        /// Iteración a punto fijo de DDMin
        #[arg(long)]
        dd_star: bool,

        /// Ejecutar DD en paralelo
        #[arg(short = 'p', long)]
        parallel: bool,

        /// Máximo de tests de interés en paralelo (solo en modo paralelo;
        /// default: unidades de proceso disponibles)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Estrategia de caché
        #[arg(long, default_value = "config", value_parser = [
            "config", "config-tuple", "content", "content-hash", "none",
        ])]
        cache: String,

        /// Guardar también en caché los tests interesantes (fallidos)
        #[arg(long)]
        cache_fail: bool,

        /// No expulsar de la caché los casos mayores al encontrar uno interesante
        #[arg(long)]
        no_cache_evict_after_fail: bool,
    },

    /// Argumentos del reductor Picireny
    Picireny {
        /// Directorio con los archivos de gramática (.g4 y bases del lexer)
        #[arg(long, required = true)]
        grammars: PathBuf,

        /// Iteración a punto fijo de DDMin
        #[arg(long)]
        dd_star: bool,

        /// Ejecutar DD en paralelo
        #[arg(short = 'p', long)]
        parallel: bool,

        /// Máximo de tests de interés en paralelo (solo en modo paralelo;
        /// default: unidades de proceso disponibles)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Estrategia de caché
        #[arg(long, default_value = "config", value_parser = [
            "config", "config-tuple", "content", "content-hash", "none",
        ])]
        cache: String,

        /// Guardar también en caché los tests interesantes (fallidos)
        #[arg(long)]
        cache_fail: bool,

        /// No expulsar de la caché los casos mayores al encontrar uno interesante
        #[arg(long)]
        no_cache_evict_after_fail: bool,
    },
}

impl Cli {
    /// Workers efectivos: default la mitad de las CPUs, acotado por arriba
    /// al número de unidades de proceso.
    pub fn effective_workers(&self) -> usize {
        let cpus = cpu_count();
        self.workers.unwrap_or(cpus / 2).min(cpus)
    }

    pub fn memory_tool(&self) -> Option<MemoryTool> {
        if !self.memory {
            return None;
        }
        match self.memory_tool.as_str() {
            "massif" => Some(MemoryTool::Massif),
            _ => Some(MemoryTool::Time),
        }
    }
}

impl ReducerCommand {
    /// Construye la variante de reductor validando las rutas requeridas.
    pub fn into_reducer(self) -> Result<Reducer> {
        match self {
            ReducerCommand::Perses { jar, object_explorer, jobs, cache } => {
                if !jar.is_file() {
                    bail!("el jar de Perses no existe ({})", jar.display());
                }
                if !object_explorer.is_file() {
                    bail!("el jar del explorador de objetos no existe ({})", object_explorer.display());
                }
                Ok(Reducer::Perses(Perses { jar, object_explorer, cache, jobs }))
            }

            ReducerCommand::Picire {
                atom,
                dd_star,
                parallel,
                jobs,
                cache,
                cache_fail,
                no_cache_evict_after_fail,
            } => Ok(Reducer::Picire(Picire {
                atom: parse_atom(&atom),
                dd: dd_options(dd_star, cache, cache_fail, no_cache_evict_after_fail, parallel, jobs),
            })),

            ReducerCommand::Picireny {
                grammars,
                dd_star,
                parallel,
                jobs,
                cache,
                cache_fail,
                no_cache_evict_after_fail,
            } => {
                if !grammars.is_dir() {
                    bail!("el directorio de gramáticas no existe ({})", grammars.display());
                }
                Ok(Reducer::Picireny(Picireny {
                    dd: dd_options(dd_star, cache, cache_fail, no_cache_evict_after_fail, parallel, jobs),
                    grammars,
                }))
            }
        }
    }
}

/// Opciones comunes de picire/picireny compuestas explícitamente.
fn dd_options(
    dd_star: bool,
    cache: String,
    cache_fail: bool,
    no_cache_evict_after_fail: bool,
    parallel: bool,
    jobs: Option<usize>,
) -> DdOptions {
    DdOptions {
        dd_star,
        cache,
        cache_fail,
        evict_after_fail: !no_cache_evict_after_fail,
        parallel,
        jobs: jobs.unwrap_or_else(cpu_count),
    }
}

fn parse_atom(atom: &str) -> Atom {
    match atom {
        "char" => Atom::Char,
        "both" => Atom::Both,
        _ => Atom::Line,
    }
}

fn cpu_count() -> usize {
    let sys = System::new_all();
    sys.cpus().len().max(1)
}
