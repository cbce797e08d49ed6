use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use azfw_policy::config::{PathsConfig, ToolConfig, TOOL_CONFIG_FILE};
use azfw_policy::sync_state::LOCK_FILE;

use crate::cli::GlobalArgs;

/// Resolved directories and settings for one invocation.
pub struct Workspace {
    pub base: PathBuf,
    pub config: ToolConfig,
    pub paths: PathsConfig,
    pub interactive: bool,
}

impl Workspace {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let base = global.base_dir.clone();
        if !base.is_dir() {
            bail!("working directory {} does not exist", base.display());
        }
        let config = match &global.config {
            Some(path) => ToolConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ToolConfig::load_or_default(&base.join(TOOL_CONFIG_FILE))
                .context("failed to load tool config")?,
        };
        let paths = config.paths.resolve(&base);
        log::debug!("working directory {}", base.display());
        Ok(Self {
            base,
            config,
            paths,
            interactive: !global.non_interactive && io::stdin().is_terminal(),
        })
    }

    pub fn lock_file(&self) -> PathBuf {
        self.base.join(LOCK_FILE)
    }

    /// Ask a yes/no question. `assume_yes` answers without asking; without a
    /// terminal the answer is no.
    pub fn confirm(&self, question: &str, assume_yes: bool) -> Result<bool> {
        if assume_yes {
            return Ok(true);
        }
        if !self.interactive {
            log::debug!("not interactive, answering no to: {question}");
            return Ok(false);
        }
        print!("{question} [y/N] ");
        io::stdout().flush().context("failed to flush stdout")?;
        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed to read answer")?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// Write rendered `(file name, contents)` pairs into `dir`. With `prune`, other
/// files carrying `extension` are removed afterwards. Returns the removed files.
pub fn write_documents(
    dir: &Path,
    docs: &[(String, String)],
    extension: &str,
    prune: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (name, contents) in docs {
        let path = dir.join(name);
        fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::debug!("wrote {}", path.display());
    }
    let mut removed = Vec::new();
    if prune {
        for path in azfw_policy::codec::list_files(dir, extension)? {
            let keep = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| docs.iter().any(|(name, _)| name == n));
            if !keep {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed.push(path);
            }
        }
    }
    Ok(removed)
}

/// Latest modification time of any file directly in `dir`.
pub fn newest_modification(dir: &Path) -> Result<Option<SystemTime>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut newest = None;
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        let meta = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if meta.is_file() {
            let modified = meta.modified().ok();
            newest = newest.max(modified);
        }
    }
    Ok(newest)
}

/// Remove everything inside `dir`, keeping the directory itself.
pub fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("failed to read {}", dir.display()))?
            .path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

pub fn is_empty_dir(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(true);
    }
    Ok(fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .next()
        .is_none())
}
