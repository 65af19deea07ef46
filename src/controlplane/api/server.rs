//! API Server
//!
//! Serves the REST surface until a shutdown signal arrives.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;
use crate::controlplane::orchestrator::StorageOrchestrator;
use crate::files::SafeFileTree;

// =============================================================================
// Configuration
// =============================================================================

/// Listen address and upload ceiling for the REST surface
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address the REST surface listens on
    pub rest_addr: SocketAddr,
    /// Max request body size (uploads)
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            max_body_size: 64 * 1024 * 1024,
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// Serves [`RestRouter`] over storage and file-tree state
pub struct ApiServer {
    config: ApiServerConfig,
    orchestrator: Arc<StorageOrchestrator>,
    files: Arc<SafeFileTree>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        orchestrator: Arc<StorageOrchestrator>,
        files: Arc<SafeFileTree>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            orchestrator,
            files,
            shutdown_tx,
        }
    }

    /// Bind and serve until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.rest_addr;
        let app = RestRouter::new(self.orchestrator.clone(), self.files.clone())
            .with_max_body_size(self.config.max_body_size)
            .build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            Error::Configuration(format!("Failed to bind REST server on {}: {}", addr, e))
        })?;
        info!("REST API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
