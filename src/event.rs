//! Structured telemetry records and the sinks that receive them.
//!
//! An [`Event`] is built once through [`EventBuilder`] and is read-only
//! afterwards. Sessions and directors hand events to a [`Channel`], which owns
//! its own delivery and drop policy.

pub mod channel;
pub mod types;

pub use channel::{Channel, DummyChannel, LogChannel, QueueChannel};
pub use types::{Event, EventBuilder, EventValue};
