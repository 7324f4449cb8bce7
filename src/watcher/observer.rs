//! Directory observation.
//!
//! The watcher only ever sees the filesystem through the
//! [`DirectoryObserver`] trait. The shipped implementation polls: a segment
//! counts as finalized once its mtime is at least `min_quiet_period` old,
//! because the encoder keeps appending to the newest file until rotation.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::error_handling::types::WatchError;

/// A segment file the observer considers safe to register.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedSegment {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait DirectoryObserver: Send + Sync {
    /// Returns the finalized segments under `dir` (recursively) whose
    /// extension is in `extensions`. A missing directory yields an empty
    /// list, not an error.
    async fn finalized_segments(
        &self,
        dir: &Path,
        extensions: &[&str],
    ) -> Result<Vec<FinalizedSegment>, WatchError>;
}

pub struct PollingObserver {
    min_quiet_period: Duration,
}

impl PollingObserver {
    pub fn new(min_quiet_period: Duration) -> Self {
        PollingObserver { min_quiet_period }
    }
}

#[async_trait]
impl DirectoryObserver for PollingObserver {
    async fn finalized_segments(
        &self,
        dir: &Path,
        extensions: &[&str],
    ) -> Result<Vec<FinalizedSegment>, WatchError> {
        let mut segments = Vec::new();
        if !dir.exists() {
            return Ok(segments);
        }

        let now = SystemTime::now();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot read directory {}: {}", current.display(), e);
                    continue;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error listing {}: {}", current.display(), e);
                        break;
                    }
                };
                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        debug!("Skipping {}: {}", path.display(), e);
                        continue;
                    }
                };
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                let matches_extension = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| extensions.contains(&ext))
                    .unwrap_or(false);
                if !matches_extension {
                    continue;
                }
                // Unknown mtime counts as "just written", not finalized.
                let modified = metadata.modified().unwrap_or(now);
                let age = now.duration_since(modified).unwrap_or_default();
                if age < self.min_quiet_period {
                    debug!(
                        "Segment {} still settling ({:?} old)",
                        path.display(),
                        age
                    );
                    continue;
                }
                segments.push(FinalizedSegment {
                    path,
                    size_bytes: metadata.len(),
                    modified: DateTime::<Utc>::from(modified),
                });
            }
        }

        segments.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(segments)
    }
}
