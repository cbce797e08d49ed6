use serde::Serialize;
use serde_json::Value;

/// A single diff outcome for a value path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DiffEntry {
    /// Value exists in both with identical content.
    Identical { path: String },
    /// Scalar exists in both but differs.
    Modified {
        path: String,
        left: String,
        right: String,
    },
    /// Value only in the left input.
    OnlyLeft { path: String, value: Value },
    /// Value only in the right input.
    OnlyRight { path: String, value: Value },
    /// Structural mismatch (for example, object on one side and array on the other).
    Structural { path: String, description: String },
}

impl DiffEntry {
    /// Path of the value this entry describes.
    pub fn path(&self) -> &str {
        match self {
            DiffEntry::Identical { path }
            | DiffEntry::Modified { path, .. }
            | DiffEntry::OnlyLeft { path, .. }
            | DiffEntry::OnlyRight { path, .. }
            | DiffEntry::Structural { path, .. } => path,
        }
    }

    /// Whether this entry reports an actual difference.
    pub fn is_difference(&self) -> bool {
        !matches!(self, DiffEntry::Identical { .. })
    }
}
