use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use azfw_policy::codec::bicep::{self, ExportContext};
use azfw_policy::codec::yaml;
use azfw_policy::config::{Environments, Firewall};
use azfw_policy::model::PolicySet;

use crate::cli::ExportArgs;
use crate::path_guard::ensure_output_disjoint;
use crate::workspace::{clear_dir, is_empty_dir, write_documents, Workspace};

struct FirewallExport {
    dir: PathBuf,
    docs: Vec<(String, String)>,
}

pub fn run_export(ws: &Workspace, args: ExportArgs) -> Result<()> {
    let envs = Environments::load(&ws.paths.firewalls).with_context(|| {
        format!("failed to load environments from {}", ws.paths.firewalls.display())
    })?;
    let env = envs.select(&args.environment)?;
    let firewalls: Vec<&Firewall> = match &args.firewall {
        Some(name) => vec![env.firewall(name).ok_or_else(|| {
            anyhow!("environment '{}' has no firewall '{name}'", env.key)
        })?],
        None => env.firewalls.iter().collect(),
    };

    let mut policies = yaml::read_dir(&ws.paths.policies).with_context(|| {
        format!("failed to read policies from {}", ws.paths.policies.display())
    })?;
    if policies.is_empty() {
        bail!("no policies in {}", ws.paths.policies.display());
    }
    if let Some(version) = &args.version {
        for policy in &mut policies {
            policy.version = Some(version.clone());
        }
    }
    let set = PolicySet::new(policies).context("policies are invalid")?;
    set.validate_parents().context("policy inheritance is broken")?;

    let api_version = args
        .api_version
        .clone()
        .unwrap_or_else(|| ws.config.export.api_version.clone());

    // Every document is rendered before anything is written.
    let mut exports = Vec::new();
    for fw in &firewalls {
        let ctx = ExportContext::new(&api_version)
            .with_ip_groups(fw.ip_group_resolver())
            .with_location(&fw.region_name)
            .with_policies(set.policies());
        let docs = bicep::render_dir(&set.parent_first(), &ctx)
            .with_context(|| format!("failed to render policies for {}", fw.firewall_name))?;
        exports.push(FirewallExport {
            dir: ws.paths.bicep.join(&fw.firewall_name),
            docs,
        });
    }

    for export in &exports {
        ensure_output_disjoint(&export.dir, &[ws.paths.policies.as_path()])?;
        if !is_empty_dir(&export.dir)? {
            if args.clean_export {
                clear_dir(&export.dir)?;
                log::info!("cleaned {}", export.dir.display());
            } else {
                let question = format!("{} is not empty. Overwrite?", export.dir.display());
                if !ws.confirm(&question, args.yes)? {
                    bail!(
                        "export aborted: {} is not empty (use --yes or --clean-export)",
                        export.dir.display()
                    );
                }
            }
        }
    }

    for export in &exports {
        write_documents(&export.dir, &export.docs, bicep::EXTENSION, false)?;
        log::info!(
            "exported {} policy(ies) to {}",
            export.docs.len(),
            export.dir.display()
        );
    }
    Ok(())
}
