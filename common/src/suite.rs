use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Un caso de reducción ya resuelto: nombre único + rutas validadas.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    /// Script "oráculo" que decide si un candidato sigue siendo interesante.
    pub oracle: PathBuf,
    /// Archivo de entrada original a reducir.
    pub input: PathBuf,
}

/// Tabla estática: nombre → (proyecto, script oráculo, archivo de entrada).
/// Los proyectos se resuelven contra --jrts-root / --perses-root.
const BENCHMARKS: &[(&str, &str, &str, &str)] = &[
    // JerryScript Reduction Test Suite (https://github.com/vincedani/jrts)
    ("jerry-3299", "jrts", "test.sh", "3299-orig.js"),
    ("jerry-3361", "jrts", "test.sh", "3361-orig.js"),
    ("jerry-3376", "jrts", "test.sh", "3376-orig.js"),
    ("jerry-3408", "jrts", "test.sh", "3408-orig.js"),
    ("jerry-3431", "jrts", "test.sh", "3431-orig.js"),
    ("jerry-3433", "jrts", "test.sh", "3433-orig.js"),
    ("jerry-3437", "jrts", "test.sh", "3437-orig.js"),
    ("jerry-3479", "jrts", "test.sh", "3479-orig.js"),
    ("jerry-3483", "jrts", "test.sh", "3483-orig.js"),
    ("jerry-3506", "jrts", "test.sh", "3506-orig.js"),
    ("jerry-3523", "jrts", "test.sh", "3523-orig.js"),
    ("jerry-3534", "jrts", "test.sh", "3534-orig.js"),
    ("jerry-3536", "jrts", "test.sh", "3536-orig.js"),
    // Perses Test Suite (https://github.com/uw-pluverse/perses)
    // Requiere el entorno docker del repositorio enlazado.
    ("clang-18556", "perses", "r.sh", "small.c"),
    ("clang-18596", "perses", "r.sh", "small.c"),
    ("clang-19595", "perses", "r.sh", "small.c"),
    ("clang-20680", "perses", "r.sh", "small.c"),
    ("clang-21467", "perses", "r.sh", "small.c"),
    ("clang-21582", "perses", "r.sh", "small.c"),
    ("clang-22337", "perses", "r.sh", "small.c"),
    ("clang-22382", "perses", "r.sh", "small.c"),
    ("clang-22704", "perses", "r.sh", "small.c"),
    ("clang-23309", "perses", "r.sh", "small.c"),
    ("clang-23353", "perses", "r.sh", "small.c"),
    ("clang-25900", "perses", "r.sh", "small.c"),
    ("clang-26350", "perses", "r.sh", "small.c"),
    ("clang-26760", "perses", "r.sh", "small.c"),
    ("clang-27137", "perses", "r.sh", "small.c"),
    ("clang-27747", "perses", "r.sh", "small.c"),
    ("clang-31259", "perses", "r.sh", "small.c"),
    ("gcc-58731", "perses", "r.sh", "small.c"),
    ("gcc-59903", "perses", "r.sh", "small.c"),
    ("gcc-60116", "perses", "r.sh", "small.c"),
    ("gcc-60452", "perses", "r.sh", "small.c"),
    ("gcc-61047", "perses", "r.sh", "small.c"),
    ("gcc-61383", "perses", "r.sh", "small.c"),
    ("gcc-61917", "perses", "r.sh", "small.c"),
    ("gcc-64990", "perses", "r.sh", "small.c"),
    ("gcc-65383", "perses", "r.sh", "small.c"),
    ("gcc-66186", "perses", "r.sh", "small.c"),
    ("gcc-66375", "perses", "r.sh", "small.c"),
    ("gcc-66412", "perses", "r.sh", "small.c"),
    ("gcc-66691", "perses", "r.sh", "small.c"),
    ("gcc-70127", "perses", "r.sh", "small.c"),
    ("gcc-70586", "perses", "r.sh", "small.c"),
    ("gcc-71626", "perses", "r.sh", "small.c"),
];

/// Selección de casos a reducir.
/// - Modo catálogo: nombre exacto ("jerry-3299") o prefijo de grupo
///   ("jerry", "clang", "gcc").
/// - Modo custom: par (oráculo, entrada) suministrado directamente.
/// Ambos modos son mutuamente excluyentes.
#[derive(Debug, Clone)]
pub struct Suite {
    entries: Vec<SuiteEntry>,
}

#[derive(Debug, Clone)]
enum SuiteEntry {
    Catalogue {
        name: String,
        root: PathBuf,
        oracle: String,
        input: String,
    },
    Custom {
        name: String,
        oracle: PathBuf,
        input: PathBuf,
    },
}

impl Suite {
    pub fn new(
        benchmark: Option<&str>,
        jrts_root: Option<&Path>,
        perses_root: Option<&Path>,
        custom_oracle: Option<&Path>,
        custom_input: Option<&Path>,
    ) -> Result<Self> {
        if benchmark.is_some() && (custom_oracle.is_some() || custom_input.is_some()) {
            bail!("el catálogo y las entradas custom son mutuamente excluyentes, usa solo uno");
        }

        if let Some(input) = custom_input {
            let Some(oracle) = custom_oracle else {
                bail!("--custom-input requiere también --custom-oracle");
            };
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "input".to_string());

            return Ok(Self {
                entries: vec![SuiteEntry::Custom {
                    name: format!("custom_{stem}"),
                    oracle: oracle.to_path_buf(),
                    input: input.to_path_buf(),
                }],
            });
        }

        let Some(selector) = benchmark else {
            bail!("no se seleccionó ningún benchmark (--benchmark o --custom-input)");
        };

        let mut entries = Vec::new();
        for (name, project, oracle, input) in BENCHMARKS {
            let selected = *name == selector || name.starts_with(selector);
            if !selected {
                continue;
            }

            let root = match *project {
                "jrts" => jrts_root,
                "perses" => perses_root,
                other => bail!("proyecto desconocido en el catálogo: {other}"),
            };
            let Some(root) = root else {
                bail!("el benchmark {name} necesita la raíz del proyecto {project} (--{project}-root)");
            };

            entries.push(SuiteEntry::Catalogue {
                name: name.to_string(),
                root: root.to_path_buf(),
                oracle: oracle.to_string(),
                input: input.to_string(),
            });
        }

        if entries.is_empty() {
            bail!("el selector '{selector}' no coincide con ningún benchmark del catálogo");
        }

        Ok(Self { entries })
    }

    /// Resuelve todos los casos a rutas concretas, validando que existan.
    /// Un archivo ausente es un error de configuración del catálogo y
    /// aborta la ejecución completa antes de planificar ningún job.
    pub fn resolve(&self) -> Result<Vec<TestCase>> {
        let mut cases = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let (name, oracle, input) = match entry {
                SuiteEntry::Custom { name, oracle, input } => {
                    (name.clone(), oracle.clone(), input.clone())
                }
                SuiteEntry::Catalogue { name, root, oracle, input } => {
                    let test_root = root.join(name);
                    (name.clone(), test_root.join(oracle), test_root.join(input))
                }
            };

            if !oracle.is_file() {
                bail!("el script oráculo de {name} no existe ({})", oracle.display());
            }
            if !input.is_file() {
                bail!("el archivo de entrada de {name} no existe ({})", input.display());
            }

            cases.push(TestCase { name, oracle, input });
        }

        Ok(cases)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
