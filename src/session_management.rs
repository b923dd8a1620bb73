//! Session management core module.
//!
//! This module provides the types and submodules that pair one attacker
//! connection with one container connection and relay traffic between them,
//! either as raw bytes or as HTTP exchanges.

use serde::{Deserialize, Serialize};

/// Submodule for the HTTP-aware request/response proxy.
pub mod http_proxy;
/// Submodule for the raw duplex relay.
pub mod relay;
/// Submodule for session data structures and utilities.
pub mod session;
/// Submodule for session manager implementation.
pub mod session_manager;

pub use http_proxy::HttpProxy;
pub use relay::{RawRelay, RelayStats, TrafficCounters};
pub use session::Session;
pub use session_manager::SessionManager;

/// Represents the current status of a session.
///
/// Variants:
/// - `Pending`: The session is awaiting its container.
/// - `Active`: The session is relaying traffic.
/// - `Completed`: The session has finished successfully.
/// - `Error`: The session encountered an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Error,
}
