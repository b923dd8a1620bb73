//! Forwarding backend: no sandbox, every dial goes to a fixed upstream.

use std::net::SocketAddr;

use log::debug;
use serde::Deserialize;
use tokio::net::TcpStream;

use crate::container_management::backend::BackendSpec;
use crate::container_management::director::Director;
use crate::container_management::registry::DirectorOptions;
use crate::error_handling::types::DirectorError;
use crate::network::backend_conn::{BackendConn, UdpConn};
use crate::network::peer::{split_host_port, PeerInfo, Transport};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForwardOptions {
    /// Upstream host, optionally with an explicit `:port`.
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct ForwardBackend {
    options: ForwardOptions,
}

impl ForwardBackend {
    pub fn new(options: ForwardOptions) -> Self {
        ForwardBackend { options }
    }

    pub fn address(&self) -> String {
        self.options.host.clone()
    }

    /// Opens a stream to the upstream, using the transport and port the
    /// attacker connected to unless the configured host names a port.
    pub async fn connect(&self, peer: &PeerInfo) -> Result<BackendConn, DirectorError> {
        let local = match (peer.transport, peer.local_addr) {
            (Transport::Unix, _) | (_, None) => {
                return Err(DirectorError::UnsupportedProtocol(format!(
                    "cannot forward {:?} connection from {}",
                    peer.transport, peer.remote_addr
                )))
            }
            (_, Some(local)) => local,
        };

        let (host, port) = upstream(&self.options.host, local.port());
        dial_upstream(peer.transport, &host, port).await
    }
}

/// Resolves `host:port` against an optional explicit port in `configured`.
pub(crate) fn upstream(configured: &str, default_port: u16) -> (String, u16) {
    match split_host_port(configured) {
        Ok((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => (host, default_port),
        },
        Err(_) => (configured.trim_matches(['[', ']']).to_string(), default_port),
    }
}

pub(crate) async fn dial_upstream(
    transport: Transport,
    host: &str,
    port: u16,
) -> Result<BackendConn, DirectorError> {
    let failed = |e: std::io::Error| DirectorError::ConnectionFailed(format!("{}:{}: {}", host, port, e));

    match transport {
        Transport::Tcp => {
            debug!("Dialing tcp {}:{}", host, port);
            let stream = TcpStream::connect((host, port)).await.map_err(failed)?;
            Ok(BackendConn::Tcp(stream))
        }
        Transport::Udp => {
            debug!("Dialing udp {}:{}", host, port);
            let target: SocketAddr = tokio::net::lookup_host((host, port))
                .await
                .map_err(failed)?
                .next()
                .ok_or_else(|| {
                    DirectorError::ConnectionFailed(format!("{}:{}: no address", host, port))
                })?;
            let conn = UdpConn::connect(target).await.map_err(failed)?;
            Ok(BackendConn::Udp(conn))
        }
        Transport::Unix => Err(DirectorError::UnsupportedProtocol(format!(
            "{}:{} over unix socket",
            host, port
        ))),
    }
}

/// Constructor registered under `"forward"`.
pub fn new_director(options: DirectorOptions) -> Result<Director, DirectorError> {
    let forward: ForwardOptions = options.decode()?;
    Director::from_options(options, BackendSpec::Forward(forward))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UdpSocket};

    #[test]
    fn explicit_port_overrides_local_port() {
        assert_eq!(upstream("10.0.0.5:8080", 80), ("10.0.0.5".to_string(), 8080));
        assert_eq!(upstream("10.0.0.5", 80), ("10.0.0.5".to_string(), 80));
        assert_eq!(upstream("[::1]:22", 2222), ("::1".to_string(), 22));
        assert_eq!(upstream("::1", 2222), ("::1".to_string(), 2222));
    }

    #[tokio::test]
    async fn forwards_tcp_using_local_port() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();

        let backend = ForwardBackend::new(ForwardOptions {
            host: "127.0.0.1".to_string(),
        });
        let peer = PeerInfo::tcp(upstream_addr, "10.0.0.1:5555".parse().unwrap());

        let server = tokio::spawn(async move {
            let (mut s, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 3];
            s.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut conn = backend.connect(&peer).await.unwrap();
        assert!(matches!(conn, BackendConn::Tcp(_)));
        conn.write_all(b"abc").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn forwards_udp_for_udp_peers() {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();

        let backend = ForwardBackend::new(ForwardOptions {
            host: upstream_addr.to_string(),
        });
        let peer = PeerInfo::udp("0.0.0.0:5060".parse().unwrap(), "10.0.0.1:5060".parse().unwrap());

        let mut conn = backend.connect(&peer).await.unwrap();
        assert!(matches!(conn, BackendConn::Udp(_)));
        conn.write_all(b"INVITE").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = upstream.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"INVITE");
    }

    #[tokio::test]
    async fn unix_peers_are_unsupported() {
        let backend = ForwardBackend::new(ForwardOptions {
            host: "127.0.0.1:80".to_string(),
        });
        let peer = PeerInfo {
            transport: Transport::Unix,
            local_addr: None,
            remote_addr: "@".to_string(),
        };

        let res = backend.connect(&peer).await;
        assert!(matches!(res, Err(DirectorError::UnsupportedProtocol(_))));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_connection_failure() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let backend = ForwardBackend::new(ForwardOptions {
            host: addr.to_string(),
        });
        let peer = PeerInfo::tcp("127.0.0.1:1".parse().unwrap(), "10.0.0.1:5555".parse().unwrap());

        let res = backend.connect(&peer).await;
        assert!(matches!(res, Err(DirectorError::ConnectionFailed(_))));
    }
}
