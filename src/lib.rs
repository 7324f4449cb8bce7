//! aircheck — capture lifecycle engine for continuous audio streams.
//!
//! Supervises one external encoder process per active stream, discovers
//! finished segment files, registers them as recordings exactly once and
//! expires old recordings per stream retention window.

pub mod capture;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod notification;
pub mod retention;
pub mod storage;
pub mod watcher;
