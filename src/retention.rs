//! Retention subsystem
//!
//! Periodic expiry of old recordings, per stream retention window.

pub mod sweeper;

pub use sweeper::{resolve_retention_days, RetentionSweeper, SWEEP_BATCH_LIMIT};
