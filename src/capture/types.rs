//! Core types used by the capture subsystem.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::configuration::config::Config;

/// Lifecycle state of one supervised capture session.
///
/// Transitions: `Stopped → Starting → Running → {Error → Retrying →
/// Starting | Stopping → Stopped}`. An `Error` that exceeds the failure
/// threshold goes straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Stopped,
    Starting,
    Running,
    Error,
    Retrying,
    Stopping,
}

/// Runtime supervision state for one actively-managed stream.
///
/// Owned exclusively by the capture supervisor, never persisted; callers
/// only ever see cloned snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureSession {
    pub stream_id: i64,
    pub stream_name: String,
    /// Fresh per `start` call, ties log lines of one supervision run together.
    pub session_id: Uuid,
    pub state: CaptureState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl CaptureSession {
    pub fn new(stream_id: i64, stream_name: String) -> Self {
        CaptureSession {
            stream_id,
            stream_name,
            session_id: Uuid::new_v4(),
            state: CaptureState::Starting,
            consecutive_failures: 0,
            last_error: None,
            started_at: None,
        }
    }

    /// Snapshot for a stream with no live supervision task.
    pub fn stopped(stream_id: i64, stream_name: String, last_error: Option<String>) -> Self {
        CaptureSession {
            stream_id,
            stream_name,
            session_id: Uuid::new_v4(),
            state: CaptureState::Stopped,
            consecutive_failures: 0,
            last_error,
            started_at: None,
        }
    }
}

/// Supervision tunables, resolved once from the application config.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Cadence of encoder liveness checks while `Running`.
    pub liveness_poll: Duration,
    /// Fixed restart backoff for streams without their own retry delay.
    pub default_retry_delay: Duration,
    /// Consecutive failures beyond which a stream is forced to `Stopped`.
    pub max_consecutive_failures: u32,
    /// How long an encoder must stay alive before the failure count resets.
    pub stable_run_threshold: Duration,
    /// How long a stopping encoder may flush before being killed.
    pub terminate_grace: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        SupervisorSettings {
            liveness_poll: Duration::from_secs(config.liveness_poll_secs),
            default_retry_delay: Duration::from_secs(config.default_retry_delay_secs),
            max_consecutive_failures: config.max_consecutive_failures,
            stable_run_threshold: Duration::from_secs(config.stable_run_secs),
            terminate_grace: Duration::from_secs(config.terminate_grace_secs),
        }
    }
}
