//! Admin HTTP API over the directors' inspection surface.
//!
//! - `GET /` health page
//! - `GET /containers` every container of every director
//! - `DELETE /containers/{name}` tears a container down

pub mod routes;
pub mod types;
pub mod web_server;

pub use types::{ApiError, ContainerEntry, RemovedResponse};
pub use web_server::WebServer;
