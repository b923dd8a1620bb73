use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::container_management::backend::BackendSpec;
use crate::container_management::container::Container;
use crate::container_management::namer::Namer;
use crate::container_management::registry::DirectorOptions;
use crate::container_management::types::{ContainerDetail, ContainerStats};
use crate::error_handling::types::DirectorError;
use crate::event::Channel;
use crate::network::peer::PeerInfo;

type Slot = Arc<OnceCell<Arc<Container>>>;

/// Maps attacking hosts to containers of a single backend kind.
///
/// The registry lock only covers slot bookkeeping. Provisioning runs on the
/// slot itself, so a slow sandbox never blocks other hosts, while concurrent
/// callers for one host wait on the same slot and share its container.
pub struct Director {
    name: String,
    kind: String,
    namer: Namer,
    spec: BackendSpec,
    channel: Arc<dyn Channel>,
    containers: Mutex<HashMap<String, Slot>>,
    total_created: AtomicU64,
    failed_count: AtomicU64,
    cancel: CancellationToken,
}

impl Director {
    pub fn new(
        name: &str,
        kind: &str,
        namer: Namer,
        spec: BackendSpec,
        channel: Arc<dyn Channel>,
    ) -> Self {
        info!("Initializing director {} ({})", name, kind);
        Director {
            name: name.to_string(),
            kind: kind.to_string(),
            namer,
            spec,
            channel,
            containers: Mutex::new(HashMap::new()),
            total_created: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Shared tail of the registered constructors.
    pub fn from_options(options: DirectorOptions, spec: BackendSpec) -> Result<Self, DirectorError> {
        let namer = Namer::new(&options.template)?;
        Ok(Director::new(&options.name, &options.kind, namer, spec, options.channel))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namer(&self) -> &Namer {
        &self.namer
    }

    /// Fires when the director shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the container for `host`, creating and provisioning it on
    /// first sight. A failed provisioning leaves no trace in the registry.
    pub async fn new_or_get_container(&self, host: &str) -> Result<Arc<Container>, DirectorError> {
        let identity = self.namer.name(host);

        let slot = {
            let mut containers = self.lock_containers();
            Arc::clone(
                containers
                    .entry(identity.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = slot
            .get_or_try_init(|| self.create_container(&identity, host))
            .await
            .map(Arc::clone);

        if result.is_err() {
            let mut containers = self.lock_containers();
            let abandoned = containers.get(&identity).is_some_and(|current| {
                Arc::ptr_eq(current, &slot)
                    && current.get().is_none()
                    // Registry plus this caller: nobody else is waiting on it.
                    && Arc::strong_count(current) == 2
            });
            if abandoned {
                containers.remove(&identity);
                debug!("[{}] Released reservation after failure", identity);
            }
        }

        result
    }

    /// Looks up the container serving the remote host of `peer`.
    pub fn get_container(&self, peer: &PeerInfo) -> Result<Arc<Container>, DirectorError> {
        let host = peer.remote_host()?;
        let identity = self.namer.name(&host);
        self.get_container_by_name(&identity)
            .ok_or(DirectorError::NotFound(identity))
    }

    pub fn get_container_by_name(&self, name: &str) -> Option<Arc<Container>> {
        let result = self
            .lock_containers()
            .get(name)
            .and_then(|slot| slot.get().cloned());
        debug!(
            "Container lookup for {}: {}",
            name,
            if result.is_some() { "found" } else { "not found" }
        );
        result
    }

    /// Snapshot of every registered container.
    pub fn list_containers(&self) -> Vec<ContainerDetail> {
        let mut details: Vec<ContainerDetail> = self
            .snapshot()
            .iter()
            .map(|c| c.describe())
            .collect();
        details.sort_by(|a, b| a.name.cmp(&b.name));
        details
    }

    /// Stops the named container and evicts it from the registry.
    pub async fn remove_container(&self, name: &str) -> Result<(), DirectorError> {
        let container = {
            let mut containers = self.lock_containers();
            match containers.get(name).and_then(|slot| slot.get().cloned()) {
                Some(container) => {
                    containers.remove(name);
                    container
                }
                None => return Err(DirectorError::NotFound(name.to_string())),
            }
        };

        info!("[{}] Removing container", name);
        container.stop().await.inspect_err(|_| {
            self.failed_count.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Removes every registered container, continuing on errors and counting failures.
    pub async fn cleanup_all_containers(&self) -> Result<(), DirectorError> {
        let containers: Vec<Arc<Container>> = {
            let mut registry = self.lock_containers();
            let drained = registry
                .values()
                .filter_map(|slot| slot.get().cloned())
                .collect();
            registry.retain(|_, slot| slot.get().is_none());
            drained
        };
        info!("[{}] Starting cleanup of {} containers", self.name, containers.len());

        let mut failures = 0;
        for container in containers {
            if let Err(e) = container.stop().await {
                error!("Failed to cleanup container {}: {}", container.name(), e);
                self.failed_count.fetch_add(1, Ordering::SeqCst);
                failures += 1;
            }
        }

        info!("[{}] Completed cleanup (failures: {})", self.name, failures);
        Ok(())
    }

    /// Stops background work and removes every container.
    pub async fn shutdown(&self) -> Result<(), DirectorError> {
        self.cancel.cancel();
        self.cleanup_all_containers().await
    }

    pub fn get_container_stats(&self) -> ContainerStats {
        ContainerStats {
            active_count: self.snapshot().len(),
            total_created: self.total_created.load(Ordering::SeqCst),
            failed_count: self.failed_count.load(Ordering::SeqCst),
        }
    }

    /// Freezes idle containers every `every` until the director shuts down.
    pub fn spawn_housekeeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let director = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => director.housekeep().await,
                    _ = director.cancel.cancelled() => break,
                }
            }
            debug!("[{}] Housekeeper stopped", director.name);
        })
    }

    /// One housekeeping pass.
    pub async fn housekeep(&self) {
        let now = Utc::now();
        for container in self.snapshot() {
            match container.freeze_if_idle(now).await {
                Ok(true) => debug!("[{}] Frozen by housekeeper", container.name()),
                Ok(false) => {}
                Err(e) => warn!("[{}] Unable to freeze: {}", container.name(), e),
            }
        }
    }

    async fn create_container(&self, identity: &str, host: &str) -> Result<Arc<Container>, DirectorError> {
        info!("Creating container {} for host {}", identity, host);
        let backend = self.spec.instantiate(&self.kind, identity, host);
        let container = Arc::new(Container::new(
            identity,
            &self.kind,
            host,
            backend,
            Arc::clone(&self.channel),
            self.cancel.child_token(),
        ));

        match container.provision().await {
            Ok(()) => {
                self.total_created.fetch_add(1, Ordering::SeqCst);
                Ok(container)
            }
            Err(e) => {
                error!("Failed to provision container {}: {}", identity, e);
                self.failed_count.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<Container>> {
        self.lock_containers()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    fn lock_containers(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
