//! Controller subsystem
//!
//! Engine composition root and control surface.

pub mod controller_handler;

pub use controller_handler::Controller;
