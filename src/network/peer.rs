use std::net::SocketAddr;

use serde::Serialize;

use crate::error_handling::types::DirectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
    Unix,
}

/// Addressing facts about an accepted connection.
///
/// `remote_addr` is kept as text so that malformed addresses surface as
/// [`DirectorError::AddressParse`] at lookup time instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub transport: Transport,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: String,
}

impl PeerInfo {
    pub fn tcp(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        PeerInfo {
            transport: Transport::Tcp,
            local_addr: Some(local_addr),
            remote_addr: remote_addr.to_string(),
        }
    }

    pub fn udp(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        PeerInfo {
            transport: Transport::Udp,
            local_addr: Some(local_addr),
            remote_addr: remote_addr.to_string(),
        }
    }

    /// Host part of the remote address, without the port.
    pub fn remote_host(&self) -> Result<String, DirectorError> {
        split_host_port(&self.remote_addr).map(|(host, _)| host)
    }
}

/// Splits `host:port` or `[v6]:port` into its parts.
pub fn split_host_port(addr: &str) -> Result<(String, String), DirectorError> {
    let bad = |reason: &str| DirectorError::AddressParse(format!("{}: {}", addr, reason));

    let (host, port) = match addr.strip_prefix('[') {
        Some(rest) => {
            let end = rest.find(']').ok_or_else(|| bad("missing ']'"))?;
            let port = rest[end + 1..]
                .strip_prefix(':')
                .ok_or_else(|| bad("missing port"))?;
            (&rest[..end], port)
        }
        None => {
            let idx = addr.rfind(':').ok_or_else(|| bad("missing port"))?;
            let host = &addr[..idx];
            if host.contains(':') {
                return Err(bad("too many colons"));
            }
            (host, &addr[idx + 1..])
        }
    };

    if host.contains(['[', ']']) || port.contains(['[', ']', ':']) {
        return Err(bad("unexpected bracket or colon"));
    }

    Ok((host.to_string(), port.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_ipv4() {
        let (host, port) = split_host_port("10.0.0.1:4444").unwrap();
        assert_eq!(host, "10.0.0.1");
        assert_eq!(port, "4444");
    }

    #[test]
    fn splits_bracketed_ipv6() {
        let (host, port) = split_host_port("[2001:db8::1]:22").unwrap();
        assert_eq!(host, "2001:db8::1");
        assert_eq!(port, "22");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for addr in ["10.0.0.1", "2001:db8::1", "[::1", "[::1]22", "[::1]:2:2", ""] {
            assert!(
                matches!(split_host_port(addr), Err(DirectorError::AddressParse(_))),
                "{} should not split",
                addr
            );
        }
    }

    #[test]
    fn remote_host_strips_port() {
        let peer = PeerInfo::tcp(
            "127.0.0.1:8080".parse().unwrap(),
            "[::1]:5555".parse().unwrap(),
        );
        assert_eq!(peer.remote_host().unwrap(), "::1");
    }
}
