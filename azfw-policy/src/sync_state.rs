//! Persistent record of the last successful synchronization (`.sync_lock`).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, ParseError};
use crate::model::Policy;
use crate::sync::{identities, Baseline};

pub const LOCK_FILE: &str = ".sync_lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Seconds since the Unix epoch.
    pub synced_at: u64,
    /// Which side won, or `none` when nothing conflicted.
    pub direction: String,
    /// SHA-256 over the synchronized directories, see [`content_hash`].
    pub content_hash: String,
    pub identities: BTreeSet<String>,
}

impl SyncState {
    pub fn new(
        direction: impl Into<String>,
        content_hash: impl Into<String>,
        policies: &[Policy],
        synced_at: SystemTime,
    ) -> Self {
        Self {
            synced_at: synced_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            direction: direction.into(),
            content_hash: content_hash.into(),
            identities: identities(policies),
        }
    }

    pub fn baseline(&self) -> Baseline {
        Baseline {
            identities: self.identities.clone(),
        }
    }

    /// Whether the directories still hash to the recorded value.
    pub fn is_unchanged(&self, current_hash: &str) -> bool {
        self.content_hash == current_hash
    }

    /// Load the state; a missing file means no previous sync.
    pub fn load(path: &Path) -> Result<Option<Self>, Error> {
        if !path.exists() {
            return Ok(None);
        }
        let file = path.display().to_string();
        let value = json_diff_core::parse_file(path).map_err(|e| ParseError::Json {
            file: file.clone(),
            source: e,
        })?;
        let state = serde_json::from_value(value)
            .map_err(|e| ParseError::document(file, "$", e.to_string()))?;
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let write_error = |source: json_diff_core::WriteError| Error::Write {
            path: path.to_path_buf(),
            source,
        };
        let value = serde_json::to_value(self)
            .map_err(|e| write_error(json_diff_core::WriteError::Json(e)))?;
        json_diff_core::write_file(&value, path).map_err(write_error)
    }
}

/// SHA-256 over the relative paths and contents of every file in `dirs`.
///
/// Files are visited in sorted order and the lock file itself is skipped, so
/// the hash only changes when a policy document changes.
pub fn content_hash(dirs: &[&Path]) -> Result<String, Error> {
    let mut hasher = Sha256::new();
    for (index, dir) in dirs.iter().enumerate() {
        hasher.update(format!("#{index}\n").as_bytes());
        let mut files = Vec::new();
        collect_files(dir, &mut files)?;
        files.sort();
        for file in files {
            let relative = file.strip_prefix(dir).unwrap_or(&file);
            let bytes = fs::read(&file).map_err(|e| Error::io(&file, e))?;
            hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), Error> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.file_name().and_then(|n| n.to_str()) != Some(LOCK_FILE) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::model::fixtures::sample_policy;

    #[test]
    fn hash_tracks_content_and_names() {
        let root = tempdir().expect("tempdir");
        let yaml = root.path().join("yaml");
        let csv = root.path().join("csv");
        fs::create_dir_all(&yaml).expect("mkdir");
        fs::create_dir_all(&csv).expect("mkdir");
        fs::write(yaml.join("a.yaml"), "name: a\n").expect("write");

        let first = content_hash(&[yaml.as_path(), csv.as_path()]).expect("hash");
        assert_eq!(first, content_hash(&[yaml.as_path(), csv.as_path()]).expect("hash"));
        assert_eq!(first.len(), 64);

        fs::write(yaml.join(LOCK_FILE), "ignored").expect("write");
        assert_eq!(first, content_hash(&[yaml.as_path(), csv.as_path()]).expect("hash"));

        fs::write(csv.join("a.csv"), "PolicyName\na\n").expect("write");
        assert_ne!(first, content_hash(&[yaml.as_path(), csv.as_path()]).expect("hash"));
    }

    #[test]
    fn state_round_trips_through_disk() {
        let root = tempdir().expect("tempdir");
        let path = root.path().join(LOCK_FILE);
        let at = UNIX_EPOCH + std::time::Duration::from_secs(1_750_000_000);
        let state = SyncState::new("yaml", "abc", &[sample_policy()], at);

        assert_eq!(SyncState::load(&path).expect("load"), None);
        state.save(&path).expect("save");
        let loaded = SyncState::load(&path).expect("load").expect("present");

        assert_eq!(loaded, state);
        assert_eq!(loaded.synced_at, 1_750_000_000);
        assert!(loaded.baseline().contains("net01/RCG_net_01/RC_nat_1/Rnat1"));
        assert!(loaded.is_unchanged("abc"));
    }

    #[test]
    fn corrupt_state_is_a_parse_error() {
        let root = tempdir().expect("tempdir");
        let path = root.path().join(LOCK_FILE);
        fs::write(&path, "{\"synced_at\": \"soon\"}").expect("write");

        let err = SyncState::load(&path).expect_err("bad state");
        assert!(matches!(err, Error::Parse(_)), "{err}");
    }
}
