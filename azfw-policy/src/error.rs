//! Structured errors surfaced by the policy core.
//!
//! The core never logs or prints; every failure carries enough context
//! (source file, row or line, entity identity, field name) for the caller to
//! print an actionable message.

use std::path::PathBuf;

use thiserror::Error;

use crate::sync::Conflict;

/// Any failure raised by the policy core.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: json_diff_core::WriteError,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Malformed input document. Never recovered automatically.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{file}: {source}")]
    Json {
        file: String,
        source: json_diff_core::ParseError,
    },
    #[error("{file}: {source}")]
    Yaml {
        file: String,
        source: serde_yaml::Error,
    },
    #[error("{file}: {source}")]
    Csv { file: String, source: csv::Error },
    /// Well-formed syntax with unexpected content.
    #[error("{file}: {location}: {message}")]
    Document {
        file: String,
        location: String,
        message: String,
    },
    /// A CSV row that cannot be mapped onto the policy model.
    #[error("{file}: row {row}: {message}")]
    Row {
        file: String,
        row: usize,
        message: String,
    },
    /// Rows of one block reappear after a different block started.
    #[error(
        "{file}: row {row}: rows for {identity} are not contiguous (block already closed at row {closed_at})"
    )]
    NonContiguous {
        file: String,
        identity: String,
        row: usize,
        closed_at: usize,
    },
}

impl ParseError {
    pub(crate) fn document(
        file: impl Into<String>,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Document {
            file: file.into(),
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn row(file: impl Into<String>, row: usize, message: impl Into<String>) -> Self {
        Self::Row {
            file: file.into(),
            row,
            message: message.into(),
        }
    }
}

/// A policy model invariant was violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity}: invalid {field}: {message}")]
pub struct ValidationError {
    /// Slash-separated identity such as `net01/RCG_net_01/RC_net_1/Rnet1`.
    pub entity: String,
    /// Model field name in its serialized (camelCase) spelling.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Synchronization aborted because both sides diverge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("YAML and CSV diverge: {}", conflict_list(.conflicts))]
pub struct ConflictError {
    pub conflicts: Vec<Conflict>,
}

impl ConflictError {
    /// Identities of every diverging entity.
    pub fn identities(&self) -> Vec<&str> {
        self.conflicts.iter().map(|c| c.identity.as_str()).collect()
    }
}

fn conflict_list(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("{} ({})", c.identity, c.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A required field was missing while encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot render {entity}: {field} {message}")]
pub struct RenderError {
    pub entity: String,
    pub field: String,
    pub message: String,
}

impl RenderError {
    pub fn new(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Environment or tool configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("{path}: firewall #{index} is missing required key '{field}'")]
    MissingField {
        path: String,
        index: usize,
        field: &'static str,
    },
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
    #[error("environment '{0}' not found")]
    UnknownEnvironment(String),
}
