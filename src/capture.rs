//! Capture subsystem
//!
//! Everything between a stream definition and a running encoder process:
//! command construction, process handling and lifecycle supervision.
//!
//! Components:
//! - `command_builder`: validated StreamConfig → ffmpeg invocation mapping.
//! - `process`: ManagedProcess/ProcessLauncher traits and the real encoder.
//! - `supervisor`: per-stream supervision tasks and the session registry.
//! - `types`: session state machine types and supervision settings.

pub mod command_builder;
pub mod process;
pub mod supervisor;
pub mod types;

pub use command_builder::{build_invocation, EncoderInvocation};
pub use process::{EncoderLauncher, ManagedProcess, ProcessLauncher};
pub use supervisor::CaptureSupervisor;
pub use types::{CaptureSession, CaptureState, SupervisorSettings};
