use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::diff::result::DiffEntry;

/// Values longer than this are shortened in text output.
const MAX_INLINE_CHARS: usize = 120;

/// One line per entry, prefixed `=`, `~`, `-`, `+` or `!`. Removed and added
/// values are shown inline in compact JSON.
pub fn format_text(entries: &[DiffEntry]) -> String {
    entries
        .iter()
        .map(|entry| match entry {
            DiffEntry::Identical { path } => format!("= {path}"),
            DiffEntry::Modified { path, left, right } => format!("~ {path}: {left} -> {right}"),
            DiffEntry::OnlyLeft { path, value } => format!("- {path} {}", inline(value)),
            DiffEntry::OnlyRight { path, value } => format!("+ {path} {}", inline(value)),
            DiffEntry::Structural { path, description } => format!("! {path}: {description}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= MAX_INLINE_CHARS {
        return text;
    }
    let cut: String = text.chars().take(MAX_INLINE_CHARS).collect();
    format!("{cut}...")
}

/// Number of entries of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub identical: usize,
    pub modified: usize,
    pub only_left: usize,
    pub only_right: usize,
    pub structural: usize,
}

impl DiffCounts {
    pub fn from_entries(entries: &[DiffEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut counts, entry| {
            match entry {
                DiffEntry::Identical { .. } => counts.identical += 1,
                DiffEntry::Modified { .. } => counts.modified += 1,
                DiffEntry::OnlyLeft { .. } => counts.only_left += 1,
                DiffEntry::OnlyRight { .. } => counts.only_right += 1,
                DiffEntry::Structural { .. } => counts.structural += 1,
            }
            counts
        })
    }

    /// Entries that are not [`DiffEntry::Identical`].
    pub fn differences(&self) -> usize {
        self.modified + self.only_left + self.only_right + self.structural
    }
}

impl fmt::Display for DiffCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "differences={} modified={} only_left={} only_right={} structural={} identical={}",
            self.differences(),
            self.modified,
            self.only_left,
            self.only_right,
            self.structural,
            self.identical
        )
    }
}

/// Counts of each entry kind on one line.
pub fn format_summary(entries: &[DiffEntry]) -> String {
    DiffCounts::from_entries(entries).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn long_values_are_shortened() {
        let entries = vec![DiffEntry::OnlyRight {
            path: "rules[big]".to_string(),
            value: json!({ "text": "x".repeat(200) }),
        }];

        let text = format_text(&entries);

        assert!(text.starts_with("+ rules[big] {\"text\":\"xxx"));
        assert!(text.ends_with("..."));
    }

    #[test]
    fn summary_counts_differences_only() {
        let entries = vec![
            DiffEntry::Identical {
                path: "a".to_string(),
            },
            DiffEntry::Modified {
                path: "b".to_string(),
                left: "1".to_string(),
                right: "2".to_string(),
            },
        ];

        assert_eq!(
            format_summary(&entries),
            "differences=1 modified=1 only_left=0 only_right=0 structural=0 identical=1"
        );
    }
}
