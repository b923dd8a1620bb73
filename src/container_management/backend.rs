//! Closed set of container backends behind one dispatch point.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::container_management::forward::{ForwardBackend, ForwardOptions};
use crate::container_management::passthrough::{PassThroughBackend, PassThroughOptions};
use crate::container_management::sandboxed::{SandboxOptions, SandboxedBackend};
use crate::container_management::stub::StubBackend;
use crate::error_handling::types::DirectorError;
use crate::network::backend_conn::BackendConn;
use crate::network::peer::PeerInfo;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-director backend configuration, instantiated once per container.
#[derive(Debug, Clone)]
pub enum BackendSpec {
    Forward(ForwardOptions),
    Sandboxed(SandboxOptions),
    PassThrough(PassThroughOptions),
    Stub,
}

impl BackendSpec {
    pub fn instantiate(&self, kind: &str, name: &str, host: &str) -> Backend {
        match self {
            BackendSpec::Forward(o) => Backend::Forward(ForwardBackend::new(o.clone())),
            BackendSpec::Sandboxed(o) => Backend::Sandboxed(SandboxedBackend::new(o.clone(), name, host)),
            BackendSpec::PassThrough(o) => Backend::PassThrough(PassThroughBackend::new(o.clone())),
            BackendSpec::Stub => Backend::Stub(StubBackend::new(kind)),
        }
    }
}

#[derive(Debug)]
pub enum Backend {
    Forward(ForwardBackend),
    Sandboxed(SandboxedBackend),
    PassThrough(PassThroughBackend),
    Stub(StubBackend),
}

impl Backend {
    pub async fn provision(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        match self {
            Backend::Sandboxed(b) => b.provision(cancel).await,
            _ => Ok(()),
        }
    }

    pub async fn connect(&self, name: &str, peer: &PeerInfo) -> Result<BackendConn, DirectorError> {
        match self {
            Backend::Forward(b) => b.connect(peer).await,
            Backend::Sandboxed(b) => b.connect().await,
            Backend::PassThrough(b) => b.connect(peer).await,
            Backend::Stub(b) => b.connect(name).await,
        }
    }

    pub async fn freeze(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        match self {
            Backend::Sandboxed(b) => b.freeze(cancel).await,
            _ => Ok(()),
        }
    }

    pub async fn unfreeze(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        match self {
            Backend::Sandboxed(b) => b.unfreeze(cancel).await,
            _ => Ok(()),
        }
    }

    pub async fn teardown(&self, cancel: &CancellationToken) -> Result<(), DirectorError> {
        match self {
            Backend::Sandboxed(b) => b.teardown(cancel).await,
            _ => Ok(()),
        }
    }

    /// Only sandboxes go idle.
    pub fn idle_threshold(&self) -> Option<Duration> {
        match self {
            Backend::Sandboxed(b) => b.idle_threshold(),
            _ => None,
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        match self {
            Backend::Sandboxed(b) => b.dial_timeout(),
            _ => DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn provision_timeout(&self) -> Duration {
        match self {
            Backend::Sandboxed(b) => b.provision_timeout(),
            _ => DEFAULT_PROVISION_TIMEOUT,
        }
    }

    pub fn address(&self) -> Option<String> {
        match self {
            Backend::Forward(b) => Some(b.address()),
            Backend::Sandboxed(b) => Some(b.address()),
            Backend::PassThrough(_) | Backend::Stub(_) => None,
        }
    }
}
