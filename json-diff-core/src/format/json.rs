use serde::Serialize;

use super::text::DiffCounts;
use crate::diff::result::DiffEntry;

#[derive(Serialize)]
struct Report<'a> {
    summary: DiffCounts,
    entries: &'a [DiffEntry],
}

/// Pretty JSON object holding the counts and every entry.
pub fn format_json(entries: &[DiffEntry]) -> String {
    let report = Report {
        summary: DiffCounts::from_entries(entries),
        entries,
    };
    serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
}
