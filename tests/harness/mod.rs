//! Integration Test Harness
//!
//! - `TestServer` - Runs a real artd server on a random port with in-memory storage
//! - `FakeGenerator` - Stands in for the image generation API
//! - `WsClient` - WebSocket client that reads progress events
//!
//! # Example
//!
//! ```rust,ignore
//! use harness::TestServer;
//!
//! #[tokio::test]
//! async fn test_generate() {
//!     let server = TestServer::start().await.unwrap();
//!     let mut ws = server.connect_ws("alice").await.unwrap();
//!     ws.generate("a red balloon").await.unwrap();
//!     let (status, _) = ws.recv_event().await.unwrap();
//!     assert_eq!(status, "processing");
//! }
//! ```

mod client;
mod generator;
mod server;

pub use client::WsClient;
pub use generator::{FakeGenerator, FAKE_PNG};
pub use server::TestServer;
