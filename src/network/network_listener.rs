//! # Network Listener Module
//!
//! Binds one TCP socket per configured service and forwards every accepted
//! connection to the controller as a [`SessionRequest`] through an async channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ Controller      │
//! │ Connections     │    │ (one accept loop │    │ (via mpsc)      │
//! └─────────────────┘    │  per service)    │    └─────────────────┘
//!                        └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use mieltrap::configuration::types::{ProxyMode, ServiceConfig};
//! use mieltrap::network::network_listener::NetworkListener;
//! use mieltrap::error_handling::types::NetworkError;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NetworkError> {
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let mut listener = NetworkListener::new(tx);
//!
//!     let services = vec![ServiceConfig {
//!         name: "http".to_string(),
//!         listen: "0.0.0.0:8080".to_string(),
//!         director: "web".to_string(),
//!         mode: ProxyMode::Http,
//!     }];
//!     listener.bind_services(&services).await?;
//!
//!     tokio::spawn(listener.start_listening(CancellationToken::new()));
//!     while let Some(request) = rx.recv().await {
//!         println!("{} -> {}", request.peer.remote_addr, request.service_name);
//!     }
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::peer::PeerInfo;
use super::session_request::SessionRequest;
use crate::configuration::types::ServiceConfig;
use crate::error_handling::types::NetworkError;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A network listener that owns one TCP socket per service.
///
/// `NetworkListener` is responsible for:
/// - Binding the listen address of every configured service
/// - Accepting connections and tagging them with the service name
/// - Forwarding them to the controller over an MPSC channel
pub struct NetworkListener {
    /// Bound sockets, paired with the name of the service they serve
    listeners: Vec<(String, TcpListener)>,

    /// Channel sender for forwarding session requests to the controller
    session_tx: Sender<SessionRequest>,
}

impl NetworkListener {
    /// Creates a listener with no bound sockets.
    ///
    /// # Arguments
    ///
    /// * `session_tx` - A channel sender for forwarding session requests
    pub fn new(session_tx: Sender<SessionRequest>) -> Self {
        Self {
            listeners: Vec::new(),
            session_tx,
        }
    }

    /// Binds a TCP socket for each service.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if all services were successfully bound
    /// * `Err(NetworkError::BindError)` naming the first address that failed
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The listen address cannot be resolved
    /// - The port is already in use or privileged
    pub async fn bind_services(&mut self, services: &[ServiceConfig]) -> Result<(), NetworkError> {
        for service in services {
            let listener = TcpListener::bind(&service.listen).await.map_err(|e| {
                error!("[!] Unable to bind {} on {}: {}", service.name, service.listen, e);
                NetworkError::BindError(service.listen.clone(), e)
            })?;

            match listener.local_addr() {
                Ok(addr) => info!("Service {} listening on {}", service.name, addr),
                Err(e) => warn!("Service {} bound but address unknown: {}", service.name, e),
            }
            self.listeners.push((service.name.clone(), listener));
        }

        Ok(())
    }

    /// Local addresses of the bound sockets, by service name.
    pub fn local_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|(name, l)| l.local_addr().ok().map(|a| (name.clone(), a)))
            .collect()
    }

    /// Runs one accept loop per bound socket until `cancel` fires.
    ///
    /// # Returns
    ///
    /// * `Ok(())` once every loop stopped on cancellation
    /// * `Err(NetworkError::ChannelFailed)` if the receiving side was dropped
    pub async fn start_listening(self, cancel: CancellationToken) -> Result<(), NetworkError> {
        let mut set = JoinSet::new();

        for (service_name, listener) in self.listeners {
            set.spawn(accept_loop(
                service_name,
                listener,
                self.session_tx.clone(),
                cancel.clone(),
            ));
        }

        let mut outcome = Ok(());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Accept loop failed: {}", e);
                    cancel.cancel();
                    outcome = Err(e);
                }
                Err(e) => {
                    error!("Accept loop panicked: {}", e);
                    cancel.cancel();
                    outcome = Err(NetworkError::ChannelFailed);
                }
            }
        }

        outcome
    }
}

async fn accept_loop(
    service_name: String,
    listener: TcpListener,
    session_tx: Sender<SessionRequest>,
    cancel: CancellationToken,
) -> Result<(), NetworkError> {
    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = cancel.cancelled() => {
                debug!("Service {} stops accepting", service_name);
                return Ok(());
            }
        };

        let (stream, remote) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Service {} accept error: {}", service_name, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let local = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Service {} dropped {}: {}", service_name, remote, e);
                continue;
            }
        };

        debug!("Service {} accepted {}", service_name, remote);
        let request = SessionRequest::new(stream, service_name.clone(), PeerInfo::tcp(local, remote));
        if session_tx.send(request).await.is_err() {
            return Err(NetworkError::ChannelFailed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::ProxyMode;
    use crate::network::peer::Transport;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    fn service(name: &str, listen: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            listen: listen.to_string(),
            director: "d".to_string(),
            mode: ProxyMode::Raw,
        }
    }

    #[tokio::test]
    async fn test_bind_services_on_ephemeral_ports() {
        let (tx, _rx) = mpsc::channel(100);
        let mut listener = NetworkListener::new(tx);

        listener
            .bind_services(&[service("a", "127.0.0.1:0"), service("b", "127.0.0.1:0")])
            .await
            .unwrap();

        let addrs = listener.local_addrs();
        assert_eq!(addrs.len(), 2);
        assert_ne!(addrs[0].1, addrs[1].1);
    }

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let (tx, _rx) = mpsc::channel(100);
        let mut listener = NetworkListener::new(tx);

        let err = listener
            .bind_services(&[service("bad", "not-an-address")])
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::BindError(ref addr, _) if addr == "not-an-address"));
    }

    #[tokio::test]
    async fn test_start_listening_channel_communication() {
        let (tx, mut rx) = mpsc::channel(100);
        let mut listener = NetworkListener::new(tx);
        listener.bind_services(&[service("sip", "127.0.0.1:0")]).await.unwrap();
        let addr = listener.local_addrs()[0].1;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listener.start_listening(cancel.clone()));

        let client = TcpStream::connect(addr).await.unwrap();
        let received = rx.recv().await.unwrap();

        assert_eq!(received.service_name, "sip");
        assert_eq!(received.peer.transport, Transport::Tcp);
        assert_eq!(received.peer.local_addr, Some(addr));
        assert_eq!(received.peer.remote_addr, client.local_addr().unwrap().to_string());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_listener() {
        let (tx, rx) = mpsc::channel(1);
        let mut listener = NetworkListener::new(tx);
        listener.bind_services(&[service("raw", "127.0.0.1:0")]).await.unwrap();
        let addr = listener.local_addrs()[0].1;
        drop(rx);

        let handle = tokio::spawn(listener.start_listening(CancellationToken::new()));
        let _client = TcpStream::connect(addr).await.unwrap();

        let res = handle.await.unwrap();
        assert!(matches!(res, Err(NetworkError::ChannelFailed)));
    }
}
