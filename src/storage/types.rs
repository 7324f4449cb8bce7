//! Shared data types used by storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted configuration of one capture stream.
///
/// Edits to a stream only take effect on the next (re)start of its capture
/// session; the supervisor reads the config once per `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Database identifier.
    pub id: i64,
    /// Unique human-readable name, also the stream's output directory name.
    pub name: String,
    /// Source URL handed to the encoder (http/https/rtmp/...).
    pub url: String,
    /// Whether the stream should be captured at all.
    pub enabled: bool,
    /// Output container/codec short name ("mp3" or "wav").
    pub format: String,
    /// Segment rotation period in seconds.
    pub segment_time: u32,
    /// Channel count, 1 (mono) or 2 (stereo).
    pub channels: u8,
    /// Optional encoder bitrate, e.g. "128k".
    pub bitrate: Option<String>,
    /// Days a recording stays active before expiry; `None` uses the engine
    /// default, zero or negative disables expiry for the stream.
    pub retention_days: Option<i64>,
    /// Delay between restart attempts; `None` uses the engine default.
    pub retry_delay_secs: Option<u64>,
    /// Last persisted lifecycle status ("stopped", "running", "error").
    pub current_status: String,
    /// Last time the stream was confirmed running.
    pub last_up: Option<DateTime<Utc>>,
    /// Last recorded failure reason.
    pub last_error: Option<String>,
}

/// Lifecycle status of a persisted recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingStatus {
    Active,
    Deleted,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Active => "active",
            RecordingStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> RecordingStatus {
        match value {
            "deleted" => RecordingStatus::Deleted,
            _ => RecordingStatus::Active,
        }
    }
}

/// Persisted record of one finished segment file.
///
/// `(stream_id, path)` is unique; `path` and `started_at` never change after
/// creation, only `status` and `deleted_at` do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub id: i64,
    pub stream_id: i64,
    pub path: String,
    pub started_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub duration_seconds: f64,
    pub status: RecordingStatus,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Insert payload for a freshly discovered segment file.
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub stream_id: i64,
    pub path: String,
    pub started_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub duration_seconds: f64,
}

/// Query filter for recording listings. Deleted entries are excluded unless
/// `include_deleted` is set; they remain in the database for statistics.
#[derive(Debug, Clone, Default)]
pub struct RecordingFilter {
    pub stream_id: Option<i64>,
    pub include_deleted: bool,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}
