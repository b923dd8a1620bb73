//! Core types used by the container management subsystem.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregate counters describing the current and historical container state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerStats {
    /// Number of containers currently registered.
    pub active_count: usize,
    /// Total number of containers successfully provisioned since director init.
    pub total_created: u64,
    /// Number of operations that failed (provisioning or teardown).
    pub failed_count: u64,
}

/// Lifecycle of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Uninitialized,
    Running,
    Frozen,
    Stopped,
}

/// Snapshot returned by `describe()` and the listing operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerDetail {
    pub name: String,
    pub state: ContainerState,
    pub last_active_at: DateTime<Utc>,
    /// Backend kind of the owning director (e.g. "forward").
    pub kind: String,
    /// Attacker host the container is bound to.
    pub host: String,
    pub created_at: DateTime<Utc>,
    pub attached_sessions: usize,
    /// Where dials go, when the backend has a fixed target.
    pub address: Option<String>,
}
