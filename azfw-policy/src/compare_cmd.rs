use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use azfw_policy::compare::{compare_files, pair_files, CompareOptions, ComparisonRecord, FilePair};
use azfw_policy::names::remove_date_suffix;
use azfw_policy::report::{render_entries, render_lines, render_summary, render_verdict};

use crate::cli::{CompareArgs, OutputFormat};
use crate::path_guard::ensure_output_disjoint;
use crate::workspace::Workspace;

pub fn run_compare(ws: &Workspace, args: CompareArgs) -> Result<()> {
    let threshold = args.threshold.unwrap_or(ws.config.compare.threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("threshold {threshold} must be between 0 and 1");
    }
    let opts = CompareOptions { threshold };

    let pairs = match (&args.left, &args.right) {
        (Some(left), Some(right)) => vec![FilePair {
            key: pair_key(left),
            left: Some(left.clone()),
            right: Some(right.clone()),
        }],
        _ => pair_files(&ws.paths.arm_import, &ws.paths.arm_export).with_context(|| {
            format!(
                "failed to pair {} with {}",
                ws.paths.arm_import.display(),
                ws.paths.arm_export.display()
            )
        })?,
    };
    if pairs.is_empty() {
        bail!("no templates to compare");
    }

    let mut records = Vec::new();
    let mut unpaired = 0usize;
    for pair in &pairs {
        let (Some(left), Some(right)) = (&pair.left, &pair.right) else {
            let missing_in = if pair.left.is_some() {
                &ws.paths.arm_export
            } else {
                &ws.paths.arm_import
            };
            log::warn!("{}: no counterpart in {}", pair.key, missing_in.display());
            unpaired += 1;
            continue;
        };
        let comparison = compare_files(left, right, &opts).with_context(|| {
            format!("failed to compare {} with {}", left.display(), right.display())
        })?;
        log::debug!("{}: score {:.6}", pair.key, comparison.score);
        records.push(ComparisonRecord {
            name: pair.key.clone(),
            left: left.display().to_string(),
            right: right.display().to_string(),
            threshold,
            comparison,
        });
    }

    match args.format {
        OutputFormat::Text => {
            for record in &records {
                println!("{}", render_verdict(&record.name, &record.comparison, threshold));
                if args.include_diff && !record.comparison.is_identical() {
                    println!("{}", render_entries(&record.comparison.entries));
                    println!("{}", render_lines(&record.comparison.lines));
                    println!("{}", render_summary(&record.comparison.entries));
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    if args.save_results {
        save_results(&ws.paths.comparison, &records)?;
    }

    let failed = records.iter().filter(|r| !r.comparison.passed).count();
    log::info!(
        "{} compared, {} failed, {} unpaired",
        records.len(),
        failed,
        unpaired
    );
    if args.strict && (failed > 0 || unpaired > 0) {
        bail!("strict mode failed: {failed} comparison(s) below {threshold}, {unpaired} unpaired");
    }
    Ok(())
}

fn pair_key(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    remove_date_suffix(stem).to_string()
}

fn save_results(dir: &Path, records: &[ComparisonRecord]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for record in records {
        let inputs = [Path::new(&record.left), Path::new(&record.right)];
        let path: PathBuf = dir.join(format!("{}.json", record.name));
        ensure_output_disjoint(&path, &inputs)?;
        let value = serde_json::to_value(record)?;
        json_diff_core::write_file(&value, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("saved {}", path.display());
    }
    Ok(())
}
