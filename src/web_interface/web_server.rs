use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use super::routes::{routes, Directors};
use crate::container_management::Director;
use crate::error_handling::types::WebError;

/// Web server for the admin HTTP API
pub struct WebServer {
    directors: Directors,
    listen: SocketAddr,
}

impl WebServer {
    pub fn new(directors: Vec<Arc<Director>>, listen: SocketAddr) -> Self {
        Self {
            directors: Arc::new(directors),
            listen,
        }
    }

    /// Binds the listen address, returning the bound address and the serving
    /// future. The future completes once `cancel` fires.
    pub fn bind(
        &self,
        cancel: CancellationToken,
    ) -> Result<(SocketAddr, impl std::future::Future<Output = ()>), WebError> {
        warp::serve(routes(Arc::clone(&self.directors)))
            .try_bind_with_graceful_shutdown(self.listen, async move { cancel.cancelled().await })
            .map_err(|e| WebError::BindFailed(format!("{}: {}", self.listen, e)))
    }

    /// Serves until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), WebError> {
        let (addr, server) = self.bind(cancel)?;
        info!("[web] admin API listening on http://{}", addr);
        server.await;
        info!("[web] admin API stopped");
        Ok(())
    }
}
