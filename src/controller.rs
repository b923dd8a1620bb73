//! Composition root: configuration, channel, directors, listeners and the
//! admin API, wired together and run until shutdown.
pub mod controller_handler;

pub use controller_handler::Controller;
