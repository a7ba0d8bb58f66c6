//! Persistence of last-known item status across restarts
//!
//! Each monitor kind owns one blob file under the state directory holding
//! the full snapshot of its items. Records are matched back to live items by
//! a stable identity hash of the item's configuration, never by position.
//!
//! ## Storage Layout
//!
//! ```text
//! <state_dir>/
//!   ├── webcheck.state
//!   ├── tcpportscheck.state
//!   ├── diskcheck.state
//!   └── processwatcher.state
//! ```
//!
//! Saves write a sibling temporary file and rename it over the old one, so a
//! crash mid-write never leaves a truncated blob behind.

pub mod error;
pub mod identity;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

pub use error::{StateError, StateResult};
pub use identity::IdentityHasher;

/// State files larger than this are refused on load.
pub const MAX_STATE_FILE_SIZE: u64 = 100 * 1024 * 1024;

const STATE_VERSION: u32 = 1;

/// One persisted item status, keyed by the item's identity hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord<S> {
    pub identity: u64,
    pub status: S,
}

#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    // saves of the same kind must not interleave on the temp file
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.state"))
    }

    /// Load the records saved under `key`. A missing file yields `Ok(None)`.
    pub async fn load<R: DeserializeOwned>(&self, key: &str) -> StateResult<Option<Vec<R>>> {
        let path = self.path_for(key);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("no state file at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(StateError::TooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let bytes = tokio::fs::read(&path).await?;
        let (version, records): (u32, Vec<R>) = bincode::deserialize(&bytes)?;
        if version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }

        debug!("loaded {} record(s) from {}", records.len(), path.display());
        Ok(Some(records))
    }

    /// Replace the records saved under `key`.
    ///
    /// On failure the previous file is removed as well, so a later load starts
    /// from defaults instead of stale data.
    pub async fn save<R: Serialize>(&self, key: &str, records: &[R]) -> StateResult<()> {
        let bytes = bincode::serialize(&(STATE_VERSION, records))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("state.tmp");

        let _guard = self.write_lock.lock().await;
        let result = write_then_rename(&self.dir, &tmp, &path, &bytes).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
            let _ = tokio::fs::remove_file(&path).await;
        } else {
            trace!("saved {} record(s) to {}", records.len(), path.display());
        }
        result
    }
}

async fn write_then_rename(dir: &Path, tmp: &Path, path: &Path, bytes: &[u8]) -> StateResult<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, path).await?;
    Ok(())
}

/// Load persisted records and hand each one to `apply` if its identity
/// matches a live item. Returns the number of items restored.
///
/// Unreadable state is logged and treated as absent.
pub async fn restore_records<S, F>(store: &StateStore, key: &str, identities: &[u64], mut apply: F) -> usize
where
    S: DeserializeOwned,
    F: FnMut(usize, S),
{
    let records = match store.load::<PersistedRecord<S>>(key).await {
        Ok(Some(records)) => records,
        Ok(None) => return 0,
        Err(e) => {
            warn!("ignoring unreadable {key} state: {e}");
            return 0;
        }
    };

    let mut by_identity: std::collections::HashMap<u64, S> = records
        .into_iter()
        .map(|record| (record.identity, record.status))
        .collect();

    let mut restored = 0;
    for (index, identity) in identities.iter().enumerate() {
        if let Some(status) = by_identity.remove(identity) {
            apply(index, status);
            restored += 1;
        }
    }
    if !by_identity.is_empty() {
        debug!("discarded {} stale {key} record(s)", by_identity.len());
    }
    restored
}
