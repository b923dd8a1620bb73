use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::configuration::ProxyMode;
use crate::container_management::{Container, Director};
use crate::error_handling::types::{DirectorError, ProxyError};
use crate::event::{Channel, Event};
use crate::network::peer::PeerInfo;
use crate::network::session_request::SessionRequest;
use crate::session_management::http_proxy::HttpProxy;
use crate::session_management::relay::{RawRelay, TrafficCounters};
use crate::session_management::session::Session;
use crate::session_management::SessionStatus;

const DEFAULT_LINGER: Duration = Duration::from_secs(2);

/// Drives sessions for one configured service.
///
/// Each accepted connection is paired with the container of its remote host
/// and relayed until either side hangs up. Failures are reported through the
/// event channel; nothing is ever written back to the attacker.
///
/// # Fields Overview
///
/// - `service_name`: service the listener accepted the connection for
/// - `director`: owns the containers this service dials into
/// - `channel`: sink for connection, session and data events
/// - `mode`: raw byte relay or HTTP-aware proxy
/// - `limiter`: caps concurrently handled sessions
/// - `max_sessions`: capacity of `limiter`
pub struct SessionManager {
    service_name: String,
    director: Arc<Director>,
    channel: Arc<dyn Channel>,
    mode: ProxyMode,
    limiter: Arc<Semaphore>,
    max_sessions: usize,
    linger: Duration,
}

impl SessionManager {
    pub fn new(
        service_name: &str,
        director: Arc<Director>,
        channel: Arc<dyn Channel>,
        mode: ProxyMode,
        max_sessions: usize,
    ) -> Self {
        Self {
            service_name: service_name.to_string(),
            director,
            channel,
            mode,
            limiter: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            linger: DEFAULT_LINGER,
        }
    }

    /// Time the raw relay keeps the second direction open after the first ended.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn director(&self) -> &Arc<Director> {
        &self.director
    }

    pub fn get_active_session_count(&self) -> usize {
        self.max_sessions - self.limiter.available_permits()
    }

    /// Serves one accepted connection to completion.
    ///
    /// Returns the finished session record, or the error that ended it.
    pub async fn handle_session<S>(&self, request: SessionRequest<S>) -> Result<Session, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let SessionRequest {
            mut stream,
            service_name,
            peer,
            timestamp,
        } = request;

        let Ok(_permit) = Arc::clone(&self.limiter).try_acquire_owned() else {
            warn!(
                "[{}] session limit ({}) reached, dropping {}",
                service_name, self.max_sessions, peer.remote_addr
            );
            // The attacker may already be gone.
            let _ = stream.shutdown().await;
            return Err(ProxyError::SessionLimitReached);
        };

        let mut session = Session::new(&service_name, &peer.remote_addr, timestamp);
        info!("[{}] new connection from {}", service_name, peer.remote_addr);
        self.channel.send(Event::connection_opened(
            &service_name,
            session.id,
            &peer.remote_addr,
            peer.local_addr,
        ));

        let counters = Arc::new(TrafficCounters::default());
        let outcome = self.serve(&mut session, stream, &peer, &counters).await;
        let stats = counters.snapshot();

        match &outcome {
            Ok(()) => session.finish(SessionStatus::Completed, stats),
            Err(e) => {
                error!("[{}] session {} failed: {}", service_name, session.id, e);
                session.finish(SessionStatus::Error, stats);
            }
        }

        self.channel
            .send(Event::connection_closed(&service_name, session.id, &peer.remote_addr));
        info!(
            "[{}] connection from {} closed ({} bytes)",
            service_name, peer.remote_addr, session.bytes_transferred
        );

        outcome.map(|_| session)
    }

    async fn serve<S>(
        &self,
        session: &mut Session,
        stream: S,
        peer: &PeerInfo,
        counters: &Arc<TrafficCounters>,
    ) -> Result<(), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let host = peer.remote_host()?;
        let container = self.director.new_or_get_container(&host).await?;
        let _attached = container.attach();

        session.container_id = Some(container.name().to_string());
        session.status = SessionStatus::Active;
        self.channel
            .send(Event::session_opened(container.name(), session.id, &peer.remote_addr));

        let result = self.relay(&container, session.id, stream, peer, counters).await;

        let stats = counters.snapshot();
        let failure = result.as_ref().err().map(|e| e.to_string());
        self.channel.send(Event::session_closed(
            container.name(),
            session.id,
            stats.attacker_to_backend,
            stats.backend_to_attacker,
            failure.as_deref(),
        ));
        result
    }

    async fn relay<S>(
        &self,
        container: &Container,
        session_id: Uuid,
        stream: S,
        peer: &PeerInfo,
        counters: &Arc<TrafficCounters>,
    ) -> Result<(), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let backend = container.dial(peer).await?;
        debug!("[{}] relaying {} via {:?}", session_id, container.name(), self.mode);

        let proxied = async {
            match self.mode {
                ProxyMode::Raw => RawRelay::new(session_id, Arc::clone(counters))
                    .with_linger(self.linger)
                    .run(stream, backend)
                    .await
                    .map(|_| ()),
                ProxyMode::Http => {
                    HttpProxy::new(
                        session_id,
                        container.name(),
                        &peer.remote_addr,
                        Arc::clone(&self.channel),
                        Arc::clone(counters),
                    )
                    .run(stream, backend)
                    .await
                }
            }
        };

        // Dropping the relay closes both streams.
        tokio::select! {
            res = proxied => res,
            _ = container.stopped() => {
                info!("[{}] container {} stopped, ending session", session_id, container.name());
                Err(ProxyError::Director(DirectorError::ResourceUnavailable(format!(
                    "{} stopped during session",
                    container.name()
                ))))
            }
        }
    }
}
