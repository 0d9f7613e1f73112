//! TestServer - in-process end-to-end test harness
//!
//! Runs the real router and workflow on a random port, backed by in-memory
//! SQLite and a `FakeGenerator`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use artd::storage::SqliteStore;
use artd::{Config, Server};
use reqwest::Client;
use tokio::task::JoinHandle;

use super::client::WsClient;
use super::generator::FakeGenerator;

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub generator: Arc<FakeGenerator>,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with a generator that always succeeds
    pub async fn start() -> Result<Self> {
        Self::start_with(FakeGenerator::new(), |_| {}).await
    }

    /// Start a server with a custom generator and config tweaks
    pub async fn start_with(
        generator: FakeGenerator,
        configure: impl FnOnce(&mut Config),
    ) -> Result<Self> {
        // Find a random available port
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let mut config = Config {
            bind_addr: addr,
            allowed_origins: Vec::new(),
            ..Config::default()
        };
        configure(&mut config);

        let generator = Arc::new(generator);
        let store = Arc::new(SqliteStore::open(None, &config.base_url()).await?);
        let server = Arc::new(Server::with_services(config, generator.clone(), store));
        let server_clone = server.clone();

        // Spawn the server in a background task
        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
        }

        if !ready {
            panic!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            generator,
            server,
            _handle: handle,
        })
    }

    /// Get the base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await?)
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .delete(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Get the WebSocket URL for a client id
    pub fn ws_url(&self, client_id: &str) -> String {
        format!("ws://{}/ws/{}", self.addr, client_id)
    }

    /// Connect a WebSocket client under `client_id`
    pub async fn connect_ws(&self, client_id: &str) -> Result<WsClient> {
        WsClient::connect(&self.ws_url(client_id)).await
    }

    /// Number of sessions the server currently tracks
    pub async fn connection_count(&self) -> usize {
        self.server.state().connections.connection_count().await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
