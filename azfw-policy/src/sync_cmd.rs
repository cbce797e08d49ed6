use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use azfw_policy::codec::{csv, yaml};
use azfw_policy::report::{render_conflicts, render_sync_outcome};
use azfw_policy::sync::{synchronize, Resolution, Snapshot};
use azfw_policy::sync_state::{content_hash, SyncState};
use azfw_policy::Error;

use crate::cli::SyncArgs;
use crate::workspace::{newest_modification, write_documents, Workspace};

pub fn run_sync(ws: &Workspace, args: SyncArgs) -> Result<()> {
    let policies_dir = ws.paths.policies.as_path();
    let csv_dir = ws.paths.csv.as_path();
    let lock = ws.lock_file();

    let state = SyncState::load(&lock)
        .with_context(|| format!("failed to read sync state {}", lock.display()))?;
    let hash = content_hash(&[policies_dir, csv_dir])?;
    if let Some(state) = &state {
        if state.is_unchanged(&hash) && !args.force {
            log::info!("nothing changed since the last sync");
            return Ok(());
        }
    }

    let yaml_policies = yaml::read_dir(policies_dir)
        .with_context(|| format!("failed to read policies from {}", policies_dir.display()))?;
    let csv_policies = csv::read_dir(csv_dir, &ws.config.csv)
        .with_context(|| format!("failed to read CSV from {}", csv_dir.display()))?;
    log::debug!(
        "read {} YAML and {} CSV policy(ies)",
        yaml_policies.len(),
        csv_policies.len()
    );

    let mut yaml_snapshot = Snapshot::new(yaml_policies);
    if let Some(modified) = newest_modification(policies_dir)? {
        yaml_snapshot = yaml_snapshot.modified_at(modified);
    }
    let mut csv_snapshot = Snapshot::new(csv_policies);
    if let Some(modified) = newest_modification(csv_dir)? {
        csv_snapshot = csv_snapshot.modified_at(modified);
    }

    let baseline = state.as_ref().map(SyncState::baseline);
    let resolution = Resolution::from(args.resolution);
    let outcome = match synchronize(yaml_snapshot, csv_snapshot, baseline.as_ref(), resolution) {
        Ok(outcome) => outcome,
        Err(Error::Conflict(err)) => {
            println!("{}", render_conflicts(&err.conflicts));
            bail!(
                "{} conflict(s) left unresolved; rerun with --resolution policies, csv or newest",
                err.conflicts.len()
            );
        }
        Err(err) => return Err(err).context("synchronization failed"),
    };
    println!("{}", render_sync_outcome(&outcome));

    // Render both sides before writing either.
    let yaml_docs = if outcome.yaml_changed {
        Some(yaml::render_dir(&outcome.policies).context("failed to render YAML")?)
    } else {
        None
    };
    let csv_docs = if outcome.csv_changed {
        Some(csv::render_dir(&outcome.policies, &ws.config.csv).context("failed to render CSV")?)
    } else {
        None
    };
    if let Some(docs) = &yaml_docs {
        write_documents(policies_dir, docs, yaml::EXTENSION, true)?;
        log::info!("updated {}", policies_dir.display());
    }
    if let Some(docs) = &csv_docs {
        write_documents(csv_dir, docs, csv::EXTENSION, true)?;
        log::info!("updated {}", csv_dir.display());
    }

    let direction = outcome
        .winner
        .map_or_else(|| "none".to_string(), |side| side.to_string().to_lowercase());
    let hash = content_hash(&[policies_dir, csv_dir])?;
    SyncState::new(direction, hash, &outcome.policies, SystemTime::now())
        .save(&lock)
        .context("failed to record sync state")?;
    Ok(())
}
