use chrono::{DateTime, Utc};
use tokio::net::TcpStream;

use super::peer::PeerInfo;

/// An accepted connection handed from a listener to the session layer.
pub struct SessionRequest<S = TcpStream> {
    pub stream: S,
    pub service_name: String,
    pub peer: PeerInfo,
    pub timestamp: DateTime<Utc>,
}

impl<S> SessionRequest<S> {
    pub fn new(stream: S, service_name: impl Into<String>, peer: PeerInfo) -> Self {
        SessionRequest {
            stream,
            service_name: service_name.into(),
            peer,
            timestamp: Utc::now(),
        }
    }
}
