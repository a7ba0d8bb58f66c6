//! Daily log files per channel
//!
//! ```text
//! <base>/<channel>/<channel>.<YYYY-MM-DD>.log
//! ```
//!
//! One file per channel is kept open and swapped when the calendar day of
//! the incoming event changes. A sweeper deletes `*.log` files older than the
//! configured maximum age.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::engine::Shutdown;

use super::error::DeliveryError;
use super::event::NotificationEvent;
use super::Sink;

/// Interval between two sweeps of old log files.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct OpenLog {
    date: String,
    file: File,
}

pub struct FileSink {
    base: PathBuf,
    max_age: Duration,
    open: Mutex<HashMap<String, OpenLog>>,
}

impl FileSink {
    pub fn new(base: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            base: base.into(),
            max_age,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, channel: &str, date: &str) -> PathBuf {
        self.base
            .join(channel)
            .join(format!("{channel}.{date}.log"))
    }

    /// Delete every `*.log` file below the base folder whose last
    /// modification is older than the maximum age. Returns how many files
    /// were removed.
    pub async fn sweep(&self) -> std::io::Result<usize> {
        let base = self.base.clone();
        let max_age = self.max_age;
        tokio::task::spawn_blocking(move || sweep_dir(&base, max_age, SystemTime::now()))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Sweep immediately and then every [`SWEEP_INTERVAL`] until shutdown.
    #[instrument(skip_all, fields(base = %self.base.display()))]
    pub async fn run_sweeper(self: Arc<Self>, shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => trace!("no expired log files"),
                        Ok(removed) => debug!("removed {removed} expired log file(s)"),
                        Err(e) => warn!("failed to sweep log files: {e}"),
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    }

    /// Flush and close all open files.
    pub async fn close(&self) {
        let mut open = self.open.lock().await;
        for (channel, mut log) in open.drain() {
            if let Err(e) = log.file.flush().await {
                warn!("failed to flush log file of channel '{channel}': {e}");
            }
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let date = event.formatted_date();
        let mut open = self.open.lock().await;

        let reopen = open
            .get(&event.channel)
            .is_none_or(|log| log.date != date);
        if reopen {
            let path = self.path_for(&event.channel, &date);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            trace!("opened log file {}", path.display());
            open.insert(
                event.channel.clone(),
                OpenLog {
                    date: date.clone(),
                    file,
                },
            );
        }

        let Some(log) = open.get_mut(&event.channel) else {
            return Ok(());
        };
        let mut line = event.log_line();
        line.push('\n');
        log.file.write_all(line.as_bytes()).await?;
        log.file.flush().await?;
        Ok(())
    }
}

fn sweep_dir(dir: &Path, max_age: Duration, now: SystemTime) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            removed += sweep_dir(&path, max_age, now)?;
            continue;
        }
        if path.extension().is_none_or(|ext| ext != "log") {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age > max_age {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
