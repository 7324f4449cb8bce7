//! Segment watcher.
//!
//! One watch loop per active stream directory. Each pass asks the observer
//! for finalized segments and registers the ones the database has not seen
//! yet. Registration is idempotent by `(stream_id, path)`, so overlapping
//! scans and restarts never duplicate entries. A stopping watcher runs one
//! final scan to catch segments the encoder flushed during shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::command_builder::{
    SEGMENT_FILE_PREFIX, SEGMENT_TIMESTAMP_PATTERN, SUPPORTED_FORMATS,
};
use crate::error_handling::types::{StorageError, WatchError};
use crate::storage::types::{NewRecording, StreamConfig};
use crate::storage::Storage;
use crate::watcher::observer::{DirectoryObserver, FinalizedSegment};

pub struct SegmentWatcher {
    storage: Arc<dyn Storage>,
    observer: Arc<dyn DirectoryObserver>,
    recordings_root: PathBuf,
    scan_interval: Duration,
    watches: StdMutex<HashMap<i64, WatchHandle>>,
}

struct WatchHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SegmentWatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        observer: Arc<dyn DirectoryObserver>,
        recordings_root: PathBuf,
        scan_interval: Duration,
    ) -> Self {
        SegmentWatcher {
            storage,
            observer,
            recordings_root,
            scan_interval,
            watches: StdMutex::new(HashMap::new()),
        }
    }

    /// Spawns the watch loop for a stream. A no-op when one is already live.
    pub fn start_watch(&self, stream: &StreamConfig) {
        let mut watches = self.watches.lock().unwrap();
        if let Some(handle) = watches.get(&stream.id) {
            if !handle.task.is_finished() {
                debug!("Stream {} is already watched", stream.name);
                return;
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let watch_loop = WatchLoop {
            storage: self.storage.clone(),
            observer: self.observer.clone(),
            stream_id: stream.id,
            stream_name: stream.name.clone(),
            dir: self.recordings_root.join(&stream.name),
            scan_interval: self.scan_interval,
        };
        info!(
            "Watching {} for stream {}",
            watch_loop.dir.display(),
            stream.name
        );
        let task = tokio::spawn(watch_loop.run(stop_rx));
        watches.insert(stream.id, WatchHandle { stop_tx, task });
    }

    /// Stops the watch loop, waiting for its final scan to complete.
    pub async fn stop_watch(&self, stream_id: i64) {
        let handle = self.watches.lock().unwrap().remove(&stream_id);
        if let Some(handle) = handle {
            let _ = handle.stop_tx.send(true);
            if let Err(e) = handle.task.await {
                warn!("Watch task for stream {} panicked: {}", stream_id, e);
            }
        }
    }

    pub async fn stop_all(&self) {
        let stream_ids: Vec<i64> = self.watches.lock().unwrap().keys().copied().collect();
        for stream_id in stream_ids {
            self.stop_watch(stream_id).await;
        }
    }

    /// Runs a single scan pass for a stream outside its loop. Returns how
    /// many new recordings were registered.
    pub async fn scan_stream_once(&self, stream: &StreamConfig) -> usize {
        let watch_loop = WatchLoop {
            storage: self.storage.clone(),
            observer: self.observer.clone(),
            stream_id: stream.id,
            stream_name: stream.name.clone(),
            dir: self.recordings_root.join(&stream.name),
            scan_interval: self.scan_interval,
        };
        watch_loop.scan_once().await
    }
}

struct WatchLoop {
    storage: Arc<dyn Storage>,
    observer: Arc<dyn DirectoryObserver>,
    stream_id: i64,
    stream_name: String,
    dir: PathBuf,
    scan_interval: Duration,
}

impl WatchLoop {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        // Immediate scan first, to reconcile after a restart.
        self.scan_once().await;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    self.scan_once().await;
                    break;
                }
                _ = tokio::time::sleep(self.scan_interval) => {
                    self.scan_once().await;
                }
            }
        }
        debug!("Watch loop for stream {} ended", self.stream_name);
    }

    async fn scan_once(&self) -> usize {
        let segments = match self
            .observer
            .finalized_segments(&self.dir, SUPPORTED_FORMATS)
            .await
        {
            Ok(segments) => segments,
            Err(e) => {
                warn!("Scan of {} failed: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut registered = 0;
        for segment in &segments {
            match self.register_segment(segment).await {
                Ok(true) => registered += 1,
                Ok(false) => {}
                // Storage trouble is not fatal, the next scan retries.
                Err(e) => warn!(
                    "Failed to register {}: {}",
                    segment.path.display(),
                    e
                ),
            }
        }
        if registered > 0 {
            info!(
                "Registered {} new recording(s) for stream {}",
                registered, self.stream_name
            );
        }
        registered
    }

    async fn register_segment(&self, segment: &FinalizedSegment) -> Result<bool, StorageError> {
        if segment.size_bytes == 0 {
            let invalid = WatchError::InvalidSegment(format!(
                "{} is empty",
                segment.path.display()
            ));
            warn!("Skipping segment: {}", invalid);
            return Ok(false);
        }
        let path = segment.path.to_string_lossy().to_string();
        if self
            .storage
            .find_recording_by_path(self.stream_id, &path)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let started_at = parse_segment_timestamp(&segment.path).unwrap_or(segment.modified);
        let duration_seconds = probe_duration(&segment.path).await;
        let recording = NewRecording {
            stream_id: self.stream_id,
            path,
            started_at,
            size_bytes: segment.size_bytes as i64,
            duration_seconds,
        };
        match self.storage.insert_recording(&recording).await {
            Ok(entry) => {
                info!(
                    "Discovered recording {} (id {}, {:.1}s)",
                    entry.path, entry.id, entry.duration_seconds
                );
                Ok(true)
            }
            // Lost a race against a concurrent scan of the same path.
            Err(StorageError::Duplicate) => {
                debug!("Recording {} already registered", recording.path);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Extracts the capture start time from a `chunk_YYYYMMDDHHMMSS` stem.
pub fn parse_segment_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let timestamp = stem.strip_prefix(SEGMENT_FILE_PREFIX)?;
    let naive = NaiveDateTime::parse_from_str(timestamp, SEGMENT_TIMESTAMP_PATTERN).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Asks ffprobe for the audio duration. Probing is best-effort: any failure
/// yields 0.0 so registration itself never blocks on a bad file.
pub async fn probe_duration(path: &Path) -> f64 {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .unwrap_or(0.0),
        Ok(output) => {
            debug!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            0.0
        }
        Err(e) => {
            debug!("Could not run ffprobe for {}: {}", path.display(), e);
            0.0
        }
    }
}
