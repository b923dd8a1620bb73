use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::configuration::{ChannelKind, Config};
use crate::container_management::{Director, DirectorOptions, DirectorRegistry};
use crate::error_handling::types::*;
use crate::event::{Channel, DummyChannel, LogChannel};
use crate::network::network_listener::NetworkListener;
use crate::network::session_request::SessionRequest;
use crate::session_management::SessionManager;
use crate::web_interface::WebServer;

/// Capacity of the listener to controller queue.
const SESSION_QUEUE: usize = 128;

/// Owns every long-lived component of a running honeypot.
///
/// # Fields Overview
///
/// - `config`: validated configuration the components were built from
/// - `directors`: one per `[directors.NAME]` table, by name
/// - `sessions`: one session manager per service, by service name
/// - `cancel`: fired on shutdown, observed by listeners and the admin API
pub struct Controller {
    config: Config,
    directors: BTreeMap<String, Arc<Director>>,
    sessions: HashMap<String, Arc<SessionManager>>,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        Self::with_registry(config, DirectorRegistry::with_builtin())
    }

    /// Builds every director through `registry` and a session manager per service.
    pub fn with_registry(config: Config, registry: DirectorRegistry) -> Result<Self, ControllerError> {
        config.validate()?;

        let channel: Arc<dyn Channel> = match config.channel.kind {
            ChannelKind::Log => Arc::new(LogChannel),
            ChannelKind::Dummy => Arc::new(DummyChannel),
        };

        let mut directors = BTreeMap::new();
        for (name, director) in &config.directors {
            let options = DirectorOptions::new(
                name,
                &director.kind,
                config.template_for(name),
                Arc::clone(&channel),
            )
            .with_settings(director.settings.clone());
            let built = registry.build(options)?;
            info!("Director {} ready ({})", name, built.kind());
            directors.insert(name.clone(), Arc::new(built));
        }

        let mut sessions = HashMap::new();
        for service in &config.services {
            let director = directors.get(&service.director).ok_or_else(|| {
                ControllerError::InitializationFailed(format!(
                    "service {} has no director {}",
                    service.name, service.director
                ))
            })?;
            let manager = SessionManager::new(
                &service.name,
                Arc::clone(director),
                Arc::clone(&channel),
                service.mode,
                config.max_sessions,
            );
            sessions.insert(service.name.clone(), Arc::new(manager));
        }

        Ok(Self {
            config,
            directors,
            sessions,
            cancel: CancellationToken::new(),
        })
    }

    pub fn directors(&self) -> Vec<Arc<Director>> {
        self.directors.values().cloned().collect()
    }

    pub fn director(&self, name: &str) -> Option<&Arc<Director>> {
        self.directors.get(name)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Binds every service, then serves until Ctrl-C or [`Controller::shutdown`].
    pub async fn run(&self) -> Result<(), ControllerError> {
        let (listener, rx) = self.bind().await?;

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => info!("Shutdown requested"),
                    Err(e) => error!("Unable to listen for shutdown signal: {}", e),
                },
                _ = cancel.cancelled() => return,
            }
            cancel.cancel();
        });

        self.serve(listener, rx).await
    }

    /// Binds one socket per configured service.
    pub async fn bind(&self) -> Result<(NetworkListener, Receiver<SessionRequest>), ControllerError> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let mut listener = NetworkListener::new(tx);
        listener.bind_services(&self.config.services).await?;
        Ok((listener, rx))
    }

    /// Dispatches accepted connections until cancelled, then tears everything down.
    pub async fn serve(
        &self,
        listener: NetworkListener,
        mut rx: Receiver<SessionRequest>,
    ) -> Result<(), ControllerError> {
        let listening = tokio::spawn(listener.start_listening(self.cancel.clone()));

        let every = self.config.delays.housekeeper_secs;
        if every > 0 {
            for director in self.directors.values() {
                director.spawn_housekeeper(Duration::from_secs(every));
            }
        }

        let web = if self.config.web.enabled {
            let listen: SocketAddr = self.config.web.listen.parse().map_err(|e| {
                ConfigError::BadAddressFormatting(format!("web: {}: {}", self.config.web.listen, e))
            })?;
            let server = WebServer::new(self.directors(), listen);
            let (addr, serving) = server.bind(self.cancel.clone())?;
            info!("[web] admin API listening on http://{}", addr);
            Some(tokio::spawn(serving))
        } else {
            None
        };

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => self.dispatch(&mut sessions, request),
                    None => {
                        warn!("Listener channel closed");
                        break;
                    }
                },
                Some(done) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = done {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        info!("Stopping {} in-flight sessions", sessions.len());
        self.cancel.cancel();
        sessions.shutdown().await;

        match listening.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Listener stopped with error: {}", e),
            Err(e) => error!("Listener task failed: {}", e),
        }
        if let Some(web) = web {
            if let Err(e) = web.await {
                error!("Admin API task failed: {}", e);
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn dispatch(&self, sessions: &mut JoinSet<()>, request: SessionRequest<TcpStream>) {
        let Some(manager) = self.sessions.get(&request.service_name) else {
            warn!("No session manager for service {}", request.service_name);
            return;
        };
        let manager = Arc::clone(manager);
        sessions.spawn(async move {
            let remote = request.peer.remote_addr.clone();
            if let Err(e) = manager.handle_session(request).await {
                debug!("[{}] session from {} ended: {}", manager.service_name(), remote, e);
            }
        });
    }

    /// Cancels background work and removes every container of every director.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for (name, director) in &self.directors {
            if let Err(e) = director.shutdown().await {
                error!("Director {} shutdown failed: {}", name, e);
            }
            let stats = director.get_container_stats();
            info!(
                "Director {} stopped (created: {}, failed: {})",
                name, stats.total_created, stats.failed_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = sock.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        addr.to_string()
    }

    fn config(upstream: &str, kind: &str) -> Config {
        Config::from_toml_str(&format!(
            r#"
[channel]
kind = "dummy"

[delays]
housekeeper_secs = 0

[[services]]
name = "echo"
listen = "127.0.0.1:0"
director = "up"

[directors.up]
kind = "{kind}"
host = "{upstream}"
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn connections_are_relayed_to_the_director() {
        init_logger();
        let controller = Arc::new(Controller::new(config(&echo_server().await, "forward")).unwrap());

        let (listener, rx) = controller.bind().await.unwrap();
        let (_, addr) = listener.local_addrs()[0].clone();
        let serving = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.serve(listener, rx).await })
        };

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello honeypot").await.unwrap();
        client.shutdown().await.unwrap();
        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"hello honeypot");

        let director = controller.director("up").unwrap();
        assert_eq!(director.list_containers()[0].name, "miel-127.0.0.1");

        controller.cancel_token().cancel();
        serving.await.unwrap().unwrap();
        assert!(director.list_containers().is_empty());
    }

    #[test]
    fn unknown_kind_falls_back_to_dummy() {
        let controller = Controller::new(config("10.0.0.5", "hyperv")).unwrap();
        assert_eq!(controller.director("up").unwrap().kind(), "dummy");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config("10.0.0.5", "forward");
        config.services.clear();
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(ConfigError::ServicesEmpty(_)))
        ));
    }

    #[test]
    fn bad_backend_settings_fail_construction() {
        let mut config = config("10.0.0.5", "forward");
        if let Some(director) = config.directors.get_mut("up") {
            director.settings.clear();
        }
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::DirectorError(DirectorError::InvalidConfig(_)))
        ));
    }
}
