//! Line-based similarity between two textual serializations.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// Direction of a changed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineChangeKind {
    /// Line present only in the left text.
    Removed,
    /// Line present only in the right text.
    Added,
}

/// One changed line, anchored to its 1-based line number in its own text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineChange {
    pub kind: LineChangeKind,
    pub left_line: Option<usize>,
    pub right_line: Option<usize>,
    pub text: String,
}

/// Similarity score plus the lines that differ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Similarity {
    /// `2 * matching lines / total lines`, in `[0, 1]`.
    pub ratio: f64,
    pub changes: Vec<LineChange>,
}

impl Similarity {
    pub fn is_identical(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Score two texts line by line.
pub fn line_similarity(left: &str, right: &str) -> Similarity {
    if left == right {
        return Similarity {
            ratio: 1.0,
            changes: Vec::new(),
        };
    }

    let diff = TextDiff::from_lines(left, right);
    let changes = diff
        .iter_all_changes()
        .filter_map(|change| {
            let kind = match change.tag() {
                ChangeTag::Delete => LineChangeKind::Removed,
                ChangeTag::Insert => LineChangeKind::Added,
                ChangeTag::Equal => return None,
            };
            Some(LineChange {
                kind,
                left_line: change.old_index().map(|i| i + 1),
                right_line: change.new_index().map(|i| i + 1),
                text: change.value().trim_end_matches(['\r', '\n']).to_string(),
            })
        })
        .collect();

    Similarity {
        ratio: f64::from(diff.ratio()),
        changes,
    }
}

/// Render a unified diff between two texts with `context` lines of context.
pub fn unified_diff(
    left: &str,
    right: &str,
    left_name: &str,
    right_name: &str,
    context: usize,
) -> String {
    TextDiff::from_lines(left, right)
        .unified_diff()
        .context_radius(context)
        .header(left_name, right_name)
        .to_string()
}
