//! TOML configuration model and loader.
pub mod config;
pub mod types;

pub use config::Config;
pub use types::{ChannelKind, DirectorConfig, ProxyMode, ServiceConfig};
