use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while parsing a JSON document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input was not well-formed JSON.
    #[error("failed to parse JSON at line {line}, column {column}: {source}")]
    Json {
        line: usize,
        column: usize,
        source: serde_json::Error,
    },
    /// Failed to read input file.
    #[error("failed to read JSON file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ParseError {
    fn from(source: serde_json::Error) -> Self {
        Self::Json {
            line: source.line(),
            column: source.column(),
            source,
        }
    }
}

/// Parse JSON bytes into a [`Value`] tree.
///
/// A leading UTF-8 byte order mark is tolerated, since templates exported from
/// the Azure portal frequently carry one.
pub fn parse(json: &[u8]) -> Result<Value, ParseError> {
    let json = json.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(json);
    Ok(serde_json::from_slice(json)?)
}

/// Parse a JSON file into a [`Value`] tree.
pub fn parse_file(path: &Path) -> Result<Value, ParseError> {
    let bytes = fs::read(path)?;
    parse(&bytes)
}
