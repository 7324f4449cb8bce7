//! Notification seam.
//!
//! Persistent failures and periodic reports are surfaced through the
//! [`Notifier`] trait. The default implementation writes to the log and the
//! event table; delivery channels like e-mail plug in behind the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use serde_json::Value;

use crate::storage::types::StreamConfig;
use crate::storage::Storage;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A stream exhausted its retry budget and was forced to stopped.
    /// Called exactly once per give-up.
    async fn notify_persistent_failure(&self, stream: &StreamConfig, reason: &str);

    /// Periodic operational summary.
    async fn notify_daily_report(&self, summary: Value);
}

/// Default notifier: log lines plus rows in the event table.
pub struct EventLogNotifier {
    storage: Arc<dyn Storage>,
}

impl EventLogNotifier {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        EventLogNotifier { storage }
    }
}

#[async_trait]
impl Notifier for EventLogNotifier {
    async fn notify_persistent_failure(&self, stream: &StreamConfig, reason: &str) {
        error!(
            "Stream {} exceeded its retry budget and was stopped: {}",
            stream.name, reason
        );
        if let Err(e) = self
            .storage
            .record_event(
                Some(stream.id),
                "error",
                &format!("persistent capture failure: {}", reason),
            )
            .await
        {
            warn!("Failed to record persistent failure event: {}", e);
        }
    }

    async fn notify_daily_report(&self, summary: Value) {
        info!("Daily report: {}", summary);
        if let Err(e) = self
            .storage
            .record_event(None, "info", &format!("daily report: {}", summary))
            .await
        {
            warn!("Failed to record daily report event: {}", e);
        }
    }
}
