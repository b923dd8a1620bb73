//! A single attacker-bound backend instance.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::container_management::backend::Backend;
use crate::container_management::types::{ContainerDetail, ContainerState};
use crate::error_handling::types::DirectorError;
use crate::event::types::{
    Event, CONTAINER_ERROR, CONTAINER_FROZEN, CONTAINER_STARTED, CONTAINER_STOPPED,
    CONTAINER_UNFROZEN, FIELD_ERROR,
};
use crate::event::Channel;
use crate::network::backend_conn::BackendConn;
use crate::network::peer::PeerInfo;

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

struct Status {
    state: ContainerState,
    last_active_at: DateTime<Utc>,
}

/// One backend instance bound to a single attacking host.
///
/// Dialing is safe from many sessions at once: provisioning runs once, and
/// freeze, unfreeze and stop transitions are serialised. Dials hold the
/// lifecycle lock shared, transitions hold it exclusively.
pub struct Container {
    identity: String,
    kind: String,
    host: String,
    created_at: DateTime<Utc>,
    status: Mutex<Status>,
    provisioned: OnceCell<()>,
    lifecycle: RwLock<()>,
    attached: AtomicUsize,
    backend: Backend,
    channel: Arc<dyn Channel>,
    cancel: CancellationToken,
}

impl Container {
    pub fn new(
        identity: &str,
        kind: &str,
        host: &str,
        backend: Backend,
        channel: Arc<dyn Channel>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Utc::now();
        Container {
            identity: identity.to_string(),
            kind: kind.to_string(),
            host: host.to_string(),
            created_at: now,
            status: Mutex::new(Status {
                state: ContainerState::Uninitialized,
                last_active_at: now,
            }),
            provisioned: OnceCell::new(),
            lifecycle: RwLock::new(()),
            attached: AtomicUsize::new(0),
            backend,
            channel,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn state(&self) -> ContainerState {
        self.status().state
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.status().last_active_at
    }

    pub fn attached_sessions(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        self.status().last_active_at = Utc::now();
    }

    pub fn describe(&self) -> ContainerDetail {
        let status = self.status();
        ContainerDetail {
            name: self.identity.clone(),
            state: status.state,
            last_active_at: status.last_active_at,
            kind: self.kind.clone(),
            host: self.host.clone(),
            created_at: self.created_at,
            attached_sessions: self.attached_sessions(),
            address: self.backend.address(),
        }
    }

    /// Marks a session as using this container until the guard is dropped.
    pub fn attach(self: &Arc<Self>) -> AttachGuard {
        self.attached.fetch_add(1, Ordering::SeqCst);
        AttachGuard {
            container: Arc::clone(self),
        }
    }

    /// Resolves once the container is stopped or its director shuts down.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Creates backend resources. Runs at most once successfully.
    ///
    /// An attempt that outlives the backend's provisioning timeout is
    /// cancelled and reported as [`DirectorError::Provisioning`].
    pub async fn provision(&self) -> Result<(), DirectorError> {
        self.provisioned
            .get_or_try_init(|| async {
                let attempt = self.cancel.child_token();
                let limit = self.backend.provision_timeout();
                let res = match tokio::time::timeout(limit, self.backend.provision(&attempt)).await {
                    Ok(res) => res,
                    Err(_) => {
                        attempt.cancel();
                        Err(DirectorError::Provisioning(format!(
                            "{} not provisioned within {:?}",
                            self.identity, limit
                        )))
                    }
                };
                if let Err(e) = res {
                    self.emit_error(&e);
                    return Err(e);
                }
                info!("[{}] Container provisioned ({})", self.identity, self.kind);
                self.emit(CONTAINER_STARTED);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Returns a fresh stream to the backend.
    pub async fn dial(&self, peer: &PeerInfo) -> Result<BackendConn, DirectorError> {
        if self.state() == ContainerState::Stopped {
            return Err(DirectorError::ResourceUnavailable(format!(
                "{} is stopped",
                self.identity
            )));
        }

        self.provision().await?;

        let guard = loop {
            let guard = self.lifecycle.read().await;
            match self.state() {
                ContainerState::Stopped => {
                    return Err(DirectorError::ResourceUnavailable(format!(
                        "{} stopped while dialing",
                        self.identity
                    )))
                }
                ContainerState::Frozen => {
                    drop(guard);
                    self.unfreeze().await?;
                }
                _ => break guard,
            }
        };

        // No freeze or stop can start until the guard is released.
        let timeout = self.backend.dial_timeout();
        let conn = match tokio::time::timeout(timeout, self.backend.connect(&self.identity, peer)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(DirectorError::ConnectionFailed(format!(
                    "{} did not answer within {:?}",
                    self.identity, timeout
                )))
            }
        };

        let mut status = self.status();
        status.state = ContainerState::Running;
        status.last_active_at = Utc::now();
        drop(status);
        drop(guard);

        debug!("[{}] Dialed backend for {}", self.identity, peer.remote_addr);
        Ok(conn)
    }

    /// Thaws a frozen container. Returns whether a transition happened.
    pub async fn unfreeze(&self) -> Result<bool, DirectorError> {
        let _guard = self.lifecycle.write().await;
        if self.state() != ContainerState::Frozen {
            return Ok(false);
        }
        self.unfreeze_locked().await
    }

    /// Freezes a running container. Returns whether a transition happened.
    pub async fn freeze(&self) -> Result<bool, DirectorError> {
        let _guard = self.lifecycle.write().await;
        if self.state() != ContainerState::Running {
            return Ok(false);
        }
        self.freeze_locked().await
    }

    /// Freezes the container if it has been running unattached for longer
    /// than its backend's idle threshold.
    pub async fn freeze_if_idle(&self, now: DateTime<Utc>) -> Result<bool, DirectorError> {
        let Some(threshold) = self.backend.idle_threshold() else {
            return Ok(false);
        };
        if !self.is_idle(now, threshold) {
            return Ok(false);
        }

        let _guard = self.lifecycle.write().await;
        if !self.is_idle(now, threshold) {
            return Ok(false);
        }
        self.freeze_locked().await?;

        // A session attached while the freeze commands ran.
        if self.attached_sessions() > 0 {
            debug!("[{}] Session attached during freeze, thawing", self.identity);
            self.unfreeze_locked().await?;
        }
        Ok(true)
    }

    /// Tears the backend down and moves to `Stopped`. Teardown failures are
    /// returned, but the container stays stopped either way.
    pub async fn stop(&self) -> Result<(), DirectorError> {
        let _guard = self.lifecycle.write().await;
        if self.state() == ContainerState::Stopped {
            return Ok(());
        }
        self.set_state(ContainerState::Stopped);
        self.cancel.cancel();

        let teardown = tokio::time::timeout(
            TEARDOWN_TIMEOUT,
            self.backend.teardown(&CancellationToken::new()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(DirectorError::Provisioning(format!(
                "{} teardown timed out",
                self.identity
            )))
        });

        info!("[{}] Container stopped", self.identity);
        self.emit(CONTAINER_STOPPED);

        if let Err(e) = &teardown {
            warn!("[{}] Teardown failed: {}", self.identity, e);
            self.emit_error(e);
        }
        teardown
    }

    async fn freeze_locked(&self) -> Result<bool, DirectorError> {
        if let Err(e) = self.backend.freeze(&self.cancel).await {
            self.emit_error(&e);
            return Err(e);
        }
        self.set_state(ContainerState::Frozen);
        info!("[{}] Container frozen", self.identity);
        self.emit(CONTAINER_FROZEN);
        Ok(true)
    }

    async fn unfreeze_locked(&self) -> Result<bool, DirectorError> {
        if let Err(e) = self.backend.unfreeze(&self.cancel).await {
            self.emit_error(&e);
            return Err(e);
        }
        let mut status = self.status();
        status.state = ContainerState::Running;
        status.last_active_at = Utc::now();
        drop(status);
        info!("[{}] Container unfrozen", self.identity);
        self.emit(CONTAINER_UNFROZEN);
        Ok(true)
    }

    fn is_idle(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let status = self.status();
        status.state == ContainerState::Running
            && self.attached_sessions() == 0
            && (now - status.last_active_at)
                .to_std()
                .map(|idle| idle >= threshold)
                .unwrap_or(false)
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ContainerState) {
        self.status().state = state;
    }

    fn emit(&self, kind: &str) {
        self.channel.send(
            Event::container(kind, &self.identity)
                .with("container-kind", self.kind.as_str())
                .with("remote-host", self.host.as_str())
                .build(),
        );
    }

    fn emit_error(&self, err: &DirectorError) {
        self.channel.send(
            Event::container(CONTAINER_ERROR, &self.identity)
                .with("container-kind", self.kind.as_str())
                .with(FIELD_ERROR, err.to_string())
                .build(),
        );
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("attached", &self.attached_sessions())
            .finish_non_exhaustive()
    }
}

/// Keeps a container marked as in use.
#[derive(Debug)]
pub struct AttachGuard {
    container: Arc<Container>,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        self.container.touch();
        self.container.attached.fetch_sub(1, Ordering::SeqCst);
    }
}
