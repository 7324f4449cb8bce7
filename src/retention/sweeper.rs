//! Retention sweeper.
//!
//! A single periodic task that expires old recordings per stream. Metadata
//! is authoritative: an entry is always marked deleted once it is expired,
//! even when the file itself cannot be removed, so a sweep never retries
//! forever on a wedged path.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::storage::types::StreamConfig;
use crate::storage::Storage;

/// Upper bound on expired entries handled per stream per pass.
pub const SWEEP_BATCH_LIMIT: i64 = 500;

pub struct RetentionSweeper {
    storage: Arc<dyn Storage>,
    sweep_interval: Duration,
    default_retention_days: i64,
    batch_limit: i64,
}

impl RetentionSweeper {
    pub fn new(
        storage: Arc<dyn Storage>,
        sweep_interval: Duration,
        default_retention_days: i64,
    ) -> Self {
        RetentionSweeper {
            storage,
            sweep_interval,
            default_retention_days,
            batch_limit: SWEEP_BATCH_LIMIT,
        }
    }

    /// Periodic sweep loop; exits when the stop channel fires.
    pub async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        info!(
            "Retention sweeper running every {:?} (default {} day(s))",
            self.sweep_interval, self.default_retention_days
        );
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(self.sweep_interval) => {
                    self.sweep_once().await;
                }
            }
        }
        info!("Retention sweeper stopped");
    }

    /// One full pass over all streams. Returns how many recordings expired.
    pub async fn sweep_once(&self) -> usize {
        let streams = match self.storage.list_streams().await {
            Ok(streams) => streams,
            Err(e) => {
                error!("Retention sweep cannot list streams: {}", e);
                return 0;
            }
        };
        let mut total = 0;
        for stream in &streams {
            total += self.sweep_stream(stream).await;
        }
        total
    }

    async fn sweep_stream(&self, stream: &StreamConfig) -> usize {
        let days = resolve_retention_days(stream.retention_days, self.default_retention_days);
        if days == 0 {
            debug!("Stream {} is exempt from retention", stream.name);
            return 0;
        }

        let cutoff = Utc::now() - chrono::Duration::days(days);
        let expired = match self
            .storage
            .list_expired(stream.id, cutoff, self.batch_limit)
            .await
        {
            Ok(expired) => expired,
            Err(e) => {
                error!(
                    "Retention sweep cannot list expired recordings for {}: {}",
                    stream.name, e
                );
                return 0;
            }
        };
        if expired.is_empty() {
            return 0;
        }

        info!(
            "Expiring {} recording(s) for stream {} older than {} day(s)",
            expired.len(),
            stream.name,
            days
        );
        let mut removed = 0;
        for entry in expired {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => debug!("Removed recording file {}", entry.path),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Recording file already missing: {}", entry.path)
                }
                Err(e) => warn!("Cannot remove {}: {}", entry.path, e),
            }
            // Marked deleted regardless of file removal.
            match self.storage.mark_deleted(entry.id, Utc::now()).await {
                Ok(()) => removed += 1,
                Err(e) => error!(
                    "Cannot mark recording {} deleted: {}",
                    entry.id, e
                ),
            }
        }
        if removed > 0 {
            if let Err(e) = self
                .storage
                .record_event(
                    Some(stream.id),
                    "info",
                    &format!("retention sweep expired {} recording(s)", removed),
                )
                .await
            {
                warn!("Failed to record sweep event: {}", e);
            }
        }
        removed
    }
}

/// `None` means the engine default; zero or negative disables expiry.
pub fn resolve_retention_days(configured: Option<i64>, default_days: i64) -> i64 {
    match configured {
        Some(days) if days <= 0 => 0,
        Some(days) => days,
        None => default_days.max(0),
    }
}
