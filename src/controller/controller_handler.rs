//! Controller
//!
//! Wires storage, supervisor, watcher and sweeper together, seeds the
//! database from the config file and drives the engine lifecycle: reconcile
//! enabled streams at startup, run until ctrl-c, then stop everything in
//! order. `start_stream`/`stop_stream`/`stream_status` are the control
//! surface an external interface layer would call.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;

use crate::capture::process::EncoderLauncher;
use crate::capture::supervisor::CaptureSupervisor;
use crate::capture::types::{CaptureSession, SupervisorSettings};
use crate::configuration::config::Config;
use crate::error_handling::types::{EngineError, StorageError};
use crate::notification::EventLogNotifier;
use crate::retention::sweeper::RetentionSweeper;
use crate::storage::{DatabaseStorage, Storage};
use crate::watcher::observer::PollingObserver;
use crate::watcher::segment_watcher::SegmentWatcher;

pub struct Controller {
    storage: Arc<dyn Storage>,
    supervisor: Arc<CaptureSupervisor>,
    watcher: Arc<SegmentWatcher>,
    sweeper: Arc<RetentionSweeper>,
}

impl Controller {
    /// Opens storage, seeds configured streams and builds the subsystems.
    pub async fn new(config: Config) -> Result<Self, EngineError> {
        let storage: Arc<dyn Storage> = match &config.database_path {
            Some(path) => Arc::new(DatabaseStorage::new_file(path).await?),
            None => Arc::new(DatabaseStorage::new().await?),
        };

        tokio::fs::create_dir_all(&config.recordings_root)
            .await
            .map_err(|e| {
                EngineError::InitializationFailed(format!(
                    "cannot create recordings root {}: {}",
                    config.recordings_root.display(),
                    e
                ))
            })?;

        for stream_seed in &config.streams {
            let stream = storage.upsert_stream(stream_seed).await?;
            info!("Seeded stream {} (id {})", stream.name, stream.id);
        }

        let notifier = Arc::new(EventLogNotifier::new(storage.clone()));
        let supervisor = Arc::new(CaptureSupervisor::new(
            storage.clone(),
            Arc::new(EncoderLauncher),
            notifier,
            config.recordings_root.clone(),
            SupervisorSettings::from_config(&config),
        ));
        let watcher = Arc::new(SegmentWatcher::new(
            storage.clone(),
            Arc::new(PollingObserver::new(Duration::from_secs(
                config.min_quiet_period_secs,
            ))),
            config.recordings_root.clone(),
            Duration::from_secs(config.scan_interval_secs),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            storage.clone(),
            Duration::from_secs(config.sweep_interval_secs),
            config.default_retention_days,
        ));

        Ok(Controller {
            storage,
            supervisor,
            watcher,
            sweeper,
        })
    }

    /// Runs the engine until ctrl-c, then shuts everything down.
    pub async fn run(&self) -> Result<(), EngineError> {
        self.reconcile_streams().await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper_task = tokio::spawn(self.sweeper.clone().run(stop_rx));
        info!("Capture engine running, press ctrl-c to stop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for shutdown signal: {}", e);
        }
        info!("Shutting down");

        let _ = stop_tx.send(true);
        if let Err(e) = sweeper_task.await {
            warn!("Sweeper task panicked: {}", e);
        }
        self.shutdown().await;
        Ok(())
    }

    /// Starts capture and watching for every enabled stream. One stream's
    /// failure never blocks the others.
    pub async fn reconcile_streams(&self) -> Result<(), EngineError> {
        for stream in self.storage.list_streams().await? {
            if !stream.enabled {
                continue;
            }
            match self.supervisor.start(stream.id).await {
                Ok(_) => self.watcher.start_watch(&stream),
                Err(e) => {
                    error!("Cannot start stream {}: {}", stream.name, e);
                    if let Err(e) = self
                        .storage
                        .record_event(
                            Some(stream.id),
                            "error",
                            &format!("startup failed: {}", e),
                        )
                        .await
                    {
                        warn!("Failed to record startup event: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Enables a stream and starts its capture session and watcher.
    pub async fn start_stream(&self, stream_id: i64) -> Result<CaptureSession, EngineError> {
        let stream = self
            .storage
            .get_stream(stream_id)
            .await?
            .ok_or(EngineError::StreamNotFound(stream_id))?;
        self.storage.set_stream_enabled(stream_id, true).await?;
        let session = self.supervisor.start(stream_id).await?;
        self.watcher.start_watch(&stream);
        Ok(session)
    }

    /// Disables a stream, terminates its encoder and stops its watcher
    /// after one final scan.
    pub async fn stop_stream(&self, stream_id: i64) -> Result<CaptureSession, EngineError> {
        self.storage
            .set_stream_enabled(stream_id, false)
            .await
            .map_err(|e| match e {
                StorageError::NotFound => EngineError::StreamNotFound(stream_id),
                other => EngineError::Storage(other),
            })?;
        let session = self.supervisor.stop(stream_id).await?;
        self.watcher.stop_watch(stream_id).await;
        Ok(session)
    }

    /// Current capture session snapshot for a stream.
    pub async fn stream_status(&self, stream_id: i64) -> Result<CaptureSession, EngineError> {
        self.supervisor.status(stream_id).await
    }

    /// Stops all supervision tasks, then all watchers.
    pub async fn shutdown(&self) {
        self.supervisor.stop_all().await;
        self.watcher.stop_all().await;
        info!("All streams stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::CaptureState;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            recordings_root: dir.path().join("recordings"),
            database_path: Some(dir.path().join("test.sqlite3")),
            scan_interval_secs: 60,
            sweep_interval_secs: 3600,
            liveness_poll_secs: 5,
            max_consecutive_failures: 5,
            default_retry_delay_secs: 5,
            default_retention_days: 3,
            stable_run_secs: 60,
            terminate_grace_secs: 10,
            min_quiet_period_secs: 10,
            streams: vec![crate::configuration::types::StreamSeed {
                name: "kexp".to_string(),
                url: "https://kexp.example/stream".to_string(),
                enabled: false,
                format: "mp3".to_string(),
                segment_time: 3600,
                channels: 2,
                bitrate: Some("128k".to_string()),
                retention_days: None,
                retry_delay_secs: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_new_seeds_streams_and_creates_root() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let root = config.recordings_root.clone();
        let controller = Controller::new(config).await.unwrap();

        assert!(root.is_dir());
        let streams = controller.storage.list_streams().await.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].name, "kexp");
        assert!(!streams[0].enabled);
    }

    #[tokio::test]
    async fn test_disabled_stream_reports_stopped() {
        let dir = TempDir::new().unwrap();
        let controller = Controller::new(config(&dir)).await.unwrap();
        controller.reconcile_streams().await.unwrap();

        let streams = controller.storage.list_streams().await.unwrap();
        let session = controller.stream_status(streams[0].id).await.unwrap();
        assert_eq!(session.state, CaptureState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_stream_rejected() {
        let dir = TempDir::new().unwrap();
        let controller = Controller::new(config(&dir)).await.unwrap();
        assert!(matches!(
            controller.start_stream(4242).await,
            Err(EngineError::StreamNotFound(4242))
        ));
        assert!(matches!(
            controller.stop_stream(4242).await,
            Err(EngineError::StreamNotFound(4242))
        ));
    }
}
