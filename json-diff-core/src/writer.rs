use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while writing a JSON document.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Failed to serialize JSON.
    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to write output file.
    #[error("failed to write JSON file: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize a value as two-space indented JSON with a trailing newline.
pub fn to_pretty_string(value: &Value) -> Result<String, WriteError> {
    let mut out = serde_json::to_string_pretty(value)?;
    out.push('\n');
    Ok(out)
}

/// Serialize a value into pretty JSON bytes.
pub fn write(value: &Value) -> Result<Vec<u8>, WriteError> {
    Ok(to_pretty_string(value)?.into_bytes())
}

/// Serialize a value and write it to `path`.
pub fn write_file(value: &Value, path: &Path) -> Result<(), WriteError> {
    let bytes = write(value)?;
    fs::write(path, bytes)?;
    Ok(())
}
