use colored::Colorize;
use json_diff_core::{format_summary, format_text, DiffEntry, LineChange, LineChangeKind};

use crate::compare::Comparison;
use crate::config::Environments;
use crate::sync::{Conflict, ConflictKind, SyncOutcome};

/// Render diff entries for terminal output.
pub fn render_entries(entries: &[DiffEntry]) -> String {
    let raw = format_text(entries);
    raw.lines()
        .map(|line| {
            if line.starts_with('+') {
                line.green().to_string()
            } else if line.starts_with('-') {
                line.red().to_string()
            } else if line.starts_with('~') {
                line.yellow().to_string()
            } else if line.starts_with('!') {
                line.magenta().to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render summary counts for terminal output.
pub fn render_summary(entries: &[DiffEntry]) -> String {
    format_summary(entries).cyan().to_string()
}

/// Render changed lines of the normalized documents with their anchors.
pub fn render_lines(lines: &[LineChange]) -> String {
    lines
        .iter()
        .map(|change| match change.kind {
            LineChangeKind::Removed => format!(
                "-{:>5}      {}",
                change.left_line.unwrap_or_default(),
                change.text
            )
            .red()
            .to_string(),
            LineChangeKind::Added => format!(
                "+      {:>5} {}",
                change.right_line.unwrap_or_default(),
                change.text
            )
            .green()
            .to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-line verdict for a compared pair.
pub fn render_verdict(name: &str, comparison: &Comparison, threshold: f64) -> String {
    let verdict = if comparison.passed {
        "PASS".green().bold()
    } else {
        "FAIL".red().bold()
    };
    format!(
        "{verdict} {name}: score={:.4} threshold={threshold:.2} differences={}",
        comparison.score,
        comparison.entries.len()
    )
}

/// Render the conflict list of a synchronization.
pub fn render_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|conflict| {
            let label = match conflict.kind {
                ConflictKind::Modified(_) => "CONFLICT".yellow(),
                ConflictKind::Deleted { .. } => "DELETED".red(),
            };
            format!("{label} {} ({})", conflict.identity, conflict.kind)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_sync_outcome(outcome: &SyncOutcome) -> String {
    let mut out = Vec::new();
    if outcome.is_noop() && outcome.conflicts.is_empty() {
        out.push("policies and CSV are in sync".green().to_string());
        return out.join("\n");
    }
    for (side, identity) in &outcome.added {
        out.push(format!("{} {identity} (from {side})", "ADDED".green()));
    }
    if !outcome.conflicts.is_empty() {
        out.push(render_conflicts(&outcome.conflicts));
        if let Some(winner) = outcome.winner {
            let resolved = format!(
                "{} conflict(s) resolved in favour of {winner}",
                outcome.conflicts.len()
            );
            out.push(resolved.cyan().to_string());
        }
    }
    out.push(
        format!(
            "yaml_changed={} csv_changed={}",
            outcome.yaml_changed, outcome.csv_changed
        )
        .cyan()
        .to_string(),
    );
    out.join("\n")
}

/// Policies added, removed and kept by an import.
pub fn render_import_summary(added: &[String], removed: &[String], common: &[String]) -> String {
    let mut out = Vec::new();
    for name in added {
        out.push(format!("{} {name}", "+".green()));
    }
    for name in removed {
        out.push(format!("{} {name}", "-".red()));
    }
    for name in common {
        out.push(format!("{} {name}", "=".normal()));
    }
    out.push(
        format!(
            "added={} removed={} common={}",
            added.len(),
            removed.len(),
            common.len()
        )
        .cyan()
        .to_string(),
    );
    out.join("\n")
}

/// List environments with their firewalls.
pub fn render_environments(envs: &Environments) -> String {
    let mut out = Vec::new();
    for (index, env) in envs.iter().enumerate() {
        out.push(format!("{}. {}", index + 1, env.key.bold()));
        for fw in &env.firewalls {
            out.push(format!(
                "   - {} subscription={} policies_rg={} region={}",
                fw.firewall_name, fw.subscription_id, fw.policies_resource_group, fw.region_name
            ));
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Side;

    #[test]
    fn conflicts_name_identity_and_kind() {
        colored::control::set_override(false);
        let conflicts = vec![
            Conflict {
                identity: "net01/RCG_net_01/RC_net_1/Rnet1".to_string(),
                kind: ConflictKind::Modified(vec!["destinationPorts".to_string()]),
            },
            Conflict {
                identity: "net01/RCG_net_01/RC_nat_1".to_string(),
                kind: ConflictKind::Deleted { side: Side::Csv },
            },
        ];

        let text = render_conflicts(&conflicts);

        assert_eq!(
            text,
            "CONFLICT net01/RCG_net_01/RC_net_1/Rnet1 (modified: destinationPorts)\n\
             DELETED net01/RCG_net_01/RC_nat_1 (deleted in CSV)"
        );
    }

    #[test]
    fn import_summary_counts() {
        colored::control::set_override(false);
        let text = render_import_summary(&["net02".to_string()], &[], &["net01".to_string()]);

        assert!(text.contains("+ net02"));
        assert!(text.contains("= net01"));
        assert!(text.ends_with("added=1 removed=0 common=1"));
    }
}
