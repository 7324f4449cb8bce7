//! Storage subsystem
//!
//! Abstractions and implementations for persisting stream configurations,
//! recording entries and operational events.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `types`: shared data types used by storage backends.
//! - `database_storage`: SQLite implementation backed by sqlx.

pub mod database_storage;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseStorage;
pub use storage_trait::Storage;
pub use types::{NewRecording, RecordingEntry, RecordingFilter, RecordingStatus, StreamConfig};
