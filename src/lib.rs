//! artd - Artelligence image generation server daemon
//!
//! Forwards text prompts to an image generation API, stores the results in
//! object storage and pushes progress to WebSocket clients.

pub mod api;
pub mod config;
pub mod generator;
pub mod storage;
pub mod workflow;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub use config::Config;

use api::AppState;
use generator::{AzureOpenAiClient, ImageGenerator};
use storage::{spawn_retention_sweep, ObjectStore};

/// The artd server instance
pub struct Server {
    config: Config,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a server backed by the configured generator and storage backend
    pub async fn new(config: Config) -> Result<Self> {
        let generator = Arc::new(AzureOpenAiClient::new(&config.generator)?);
        if !generator.is_configured() {
            info!("Image generation API not configured; /generate will fail");
        }
        let store = storage::open_store(&config).await?;
        Ok(Self::with_services(config, generator, store))
    }

    /// Create a server around an existing generator and store
    pub fn with_services(
        config: Config,
        generator: Arc<dyn ImageGenerator>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let state = AppState::new(&config, generator, store);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            state,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Shared handler state
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router
    fn router(&self) -> Router {
        api::router(self.state.clone(), &self.config.allowed_origins)
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "artd listening on {} (storage: {})",
            local_addr,
            self.state.store.backend_name()
        );

        let sweeper = self.config.storage.retention_days.map(|days| {
            info!("Deleting images older than {} days", days);
            spawn_retention_sweep(
                self.state.store.clone(),
                days,
                Duration::from_secs(self.config.storage.sweep_interval_secs.max(1)),
                self.shutdown_rx.clone(),
            )
        });

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        info!("artd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
