//! Network plumbing: peer metadata, backend streams and the accept loop.
pub mod backend_conn;
pub mod network_listener;
pub mod peer;
pub mod session_request;

pub use backend_conn::{BackendConn, UdpConn};
pub use peer::{split_host_port, PeerInfo, Transport};
pub use session_request::SessionRequest;
