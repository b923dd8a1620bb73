//! Reflector backend: dials back to the attacking host itself.

use serde::Deserialize;

use crate::container_management::backend::BackendSpec;
use crate::container_management::director::Director;
use crate::container_management::forward::dial_upstream;
use crate::container_management::registry::DirectorOptions;
use crate::error_handling::types::DirectorError;
use crate::network::backend_conn::BackendConn;
use crate::network::peer::{PeerInfo, Transport};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PassThroughOptions {
    /// Port to reflect to, defaults to the port the attacker connected to.
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct PassThroughBackend {
    options: PassThroughOptions,
}

impl PassThroughBackend {
    pub fn new(options: PassThroughOptions) -> Self {
        PassThroughBackend { options }
    }

    pub async fn connect(&self, peer: &PeerInfo) -> Result<BackendConn, DirectorError> {
        let local = match (peer.transport, peer.local_addr) {
            (Transport::Unix, _) | (_, None) => {
                return Err(DirectorError::UnsupportedProtocol(format!(
                    "cannot reflect {:?} connection from {}",
                    peer.transport, peer.remote_addr
                )))
            }
            (_, Some(local)) => local,
        };

        let host = peer.remote_host()?;
        let port = self.options.port.unwrap_or_else(|| local.port());
        dial_upstream(peer.transport, &host, port).await
    }
}

/// Constructor registered under `"passthrough"`.
pub fn new_director(options: DirectorOptions) -> Result<Director, DirectorError> {
    let passthrough: PassThroughOptions = options.decode()?;
    Director::from_options(options, BackendSpec::PassThrough(passthrough))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reflects_to_remote_host_on_configured_port() {
        let mirror = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mirror_port = mirror.local_addr().unwrap().port();

        let backend = PassThroughBackend::new(PassThroughOptions {
            port: Some(mirror_port),
        });
        let peer = PeerInfo::tcp("127.0.0.1:23".parse().unwrap(), "127.0.0.1:40000".parse().unwrap());

        let server = tokio::spawn(async move {
            let (mut s, _) = mirror.accept().await.unwrap();
            s.write_all(b"login: ").await.unwrap();
        });

        let mut conn = backend.connect(&peer).await.unwrap();
        let mut buf = [0u8; 7];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"login: ");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_remote_address_is_rejected() {
        let backend = PassThroughBackend::new(PassThroughOptions::default());
        let peer = PeerInfo {
            transport: Transport::Tcp,
            local_addr: Some("127.0.0.1:23".parse().unwrap()),
            remote_addr: "no-port-here".to_string(),
        };

        let res = backend.connect(&peer).await;
        assert!(matches!(res, Err(DirectorError::AddressParse(_))));
    }
}
