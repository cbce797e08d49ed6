use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use azfw_policy::codec::{arm, csv, list_files, yaml};
use azfw_policy::model::PolicySet;
use azfw_policy::report::render_import_summary;
use azfw_policy::sync_state::{content_hash, SyncState};

use crate::cli::ImportArgs;
use crate::path_guard::ensure_output_disjoint;
use crate::workspace::{write_documents, Workspace};

pub fn run_import(ws: &Workspace, args: ImportArgs) -> Result<()> {
    let files = if args.files.is_empty() {
        list_files(&ws.paths.arm_import, "json")
            .with_context(|| format!("failed to list {}", ws.paths.arm_import.display()))?
    } else {
        args.files.clone()
    };
    if files.is_empty() {
        bail!(
            "no ARM templates to import in {}",
            ws.paths.arm_import.display()
        );
    }

    let mut policies = Vec::new();
    for file in &files {
        let decoded = arm::decode_file(file)
            .with_context(|| format!("failed to import {}", file.display()))?;
        log::info!("{}: {} policy(ies)", file.display(), decoded.len());
        policies.extend(decoded);
    }
    let set = PolicySet::new(policies).context("imported policies are invalid")?;
    set.validate_parents()
        .context("imported policies reference a missing parent")?;

    let inputs: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
    ensure_output_disjoint(&ws.paths.policies, &inputs)?;
    ensure_output_disjoint(&ws.paths.csv, &inputs)?;

    // Render everything before touching the working directory.
    let yaml_docs = yaml::render_dir(set.policies()).context("failed to render YAML")?;
    let csv_docs =
        csv::render_dir(set.policies(), &ws.config.csv).context("failed to render CSV")?;

    let existing = existing_stems(&ws.paths.policies, yaml::EXTENSION)?;
    let imported: BTreeSet<String> = yaml_docs.iter().map(|(name, _)| stem(name)).collect();
    let added: Vec<String> = imported.difference(&existing).cloned().collect();
    let removed: Vec<String> = existing.difference(&imported).cloned().collect();
    let common: Vec<String> = imported.intersection(&existing).cloned().collect();
    println!("{}", render_import_summary(&added, &removed, &common));

    let prune = if removed.is_empty() {
        false
    } else {
        let question = format!(
            "Delete {} policy(ies) that are not part of the import?",
            removed.len()
        );
        let confirmed = ws.confirm(&question, args.yes)?;
        if !confirmed {
            log::warn!("keeping {} policy(ies) not in the import", removed.len());
        }
        confirmed
    };

    for path in write_documents(&ws.paths.policies, &yaml_docs, yaml::EXTENSION, prune)? {
        log::info!("removed {}", path.display());
    }
    for path in write_documents(&ws.paths.csv, &csv_docs, csv::EXTENSION, prune)? {
        log::info!("removed {}", path.display());
    }
    log::info!(
        "imported {} policy(ies) into {} and {}",
        set.len(),
        ws.paths.policies.display(),
        ws.paths.csv.display()
    );

    let hash = content_hash(&[ws.paths.policies.as_path(), ws.paths.csv.as_path()])?;
    let written = if prune {
        set.policies().to_vec()
    } else {
        // Kept policies still take part in deletion detection.
        yaml::read_dir(&ws.paths.policies).context("failed to re-read policies")?
    };
    SyncState::new("import", hash, &written, SystemTime::now())
        .save(&ws.lock_file())
        .context("failed to record sync state")?;
    Ok(())
}

fn existing_stems(dir: &Path, extension: &str) -> Result<BTreeSet<String>> {
    Ok(list_files(dir, extension)?
        .iter()
        .filter_map(|path| path.file_stem().and_then(|s| s.to_str()))
        .map(str::to_string)
        .collect())
}

fn stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}
