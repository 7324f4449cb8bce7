//! Storage trait
//!
//! Defines the uniform persistence API consumed by the capture supervisor,
//! the segment watcher and the retention sweeper. Implementors persist
//! stream configurations, recording entries and operational events.
//!
//! All methods return a `Result` to handle potential storage errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::configuration::types::StreamSeed;
use crate::error_handling::types::StorageError;
use crate::storage::types::{NewRecording, RecordingEntry, RecordingFilter, StreamConfig};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts or updates a stream configuration, keyed by its unique name,
    /// and returns the persisted row.
    async fn upsert_stream(&self, seed: &StreamSeed) -> Result<StreamConfig, StorageError>;

    /// Fetches one stream configuration by id.
    async fn get_stream(&self, stream_id: i64) -> Result<Option<StreamConfig>, StorageError>;

    /// Lists all configured streams.
    async fn list_streams(&self) -> Result<Vec<StreamConfig>, StorageError>;

    /// Flips the enabled flag of a stream.
    async fn set_stream_enabled(&self, stream_id: i64, enabled: bool)
        -> Result<(), StorageError>;

    /// Persists a coarse lifecycle status for operator visibility. The
    /// `last_up` marker is refreshed whenever the status is "running".
    async fn update_stream_status(
        &self,
        stream_id: i64,
        status: &str,
        last_error: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Registers one segment file. Fails with [`StorageError::Duplicate`]
    /// when `(stream_id, path)` already exists; callers treat that as
    /// success to keep registration idempotent.
    async fn insert_recording(
        &self,
        recording: &NewRecording,
    ) -> Result<RecordingEntry, StorageError>;

    /// Looks up a recording by its path, regardless of status.
    async fn find_recording_by_path(
        &self,
        stream_id: i64,
        path: &str,
    ) -> Result<Option<RecordingEntry>, StorageError>;

    /// Lists recordings matching the filter, newest first.
    async fn list_recordings(
        &self,
        filter: Option<RecordingFilter>,
    ) -> Result<Vec<RecordingEntry>, StorageError>;

    /// Lists up to `limit` active recordings of a stream started before
    /// `cutoff`, oldest first.
    async fn list_expired(
        &self,
        stream_id: i64,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RecordingEntry>, StorageError>;

    /// Marks a recording deleted and stamps `deleted_at`. A deleted entry is
    /// never revived.
    async fn mark_deleted(
        &self,
        recording_id: i64,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Appends a row to the operational event log.
    async fn record_event(
        &self,
        stream_id: Option<i64>,
        level: &str,
        message: &str,
    ) -> Result<(), StorageError>;
}
