pub mod configuration;
pub mod container_management;
pub mod controller;
pub mod error_handling;
pub mod event;
pub mod network;
pub mod process;
pub mod session_management;
pub mod web_interface;

pub use session_management::SessionStatus;
