use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Gramáticas soportadas para la reducción estructurada, por extensión del
/// archivo de entrada. Cada entrada lleva los archivos de gramática y la
/// regla inicial del parser.
pub fn grammar_for(extension: &str, root: &Path) -> Result<(Vec<PathBuf>, &'static str)> {
    match extension {
        "js" => Ok((
            vec![
                root.join("JavaScriptLexer.g4"),
                root.join("JavaScriptLexerBase.py"),
                root.join("JavaScriptParser.g4"),
                root.join("JavaScriptParserBase.py"),
            ],
            "program",
        )),
        "c" => Ok((vec![root.join("C.g4")], "compilationUnit")),
        other => bail!("el tipo de entrada dado ({other}) no está soportado"),
    }
}
