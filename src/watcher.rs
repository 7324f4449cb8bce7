//! Segment watcher subsystem
//!
//! Discovers finalized segment files on disk and registers them as
//! recordings, exactly once per path.
//!
//! Components:
//! - `observer`: the DirectoryObserver capability and its polling impl.
//! - `segment_watcher`: per-stream watch loops and registration logic.

pub mod observer;
pub mod segment_watcher;

pub use observer::{DirectoryObserver, FinalizedSegment, PollingObserver};
pub use segment_watcher::SegmentWatcher;
