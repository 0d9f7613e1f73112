//! FakeGenerator - in-process stand-in for the image generation API

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use artd::generator::{GeneratedImage, GenerationError, GenerationRequest, ImageGenerator};
use async_trait::async_trait;

/// PNG signature followed by filler, enough for content-type checks
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake image data";

#[derive(Default)]
pub struct FakeGenerator {
    delay: Option<Duration>,
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stall every generate call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject every generate call with an API error
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.fail_with {
            return Err(GenerationError::Api {
                status: 400,
                message: message.clone(),
            });
        }
        Ok(GeneratedImage {
            url: format!("https://provider.example/tmp/{}.png", self.calls()),
            revised_prompt: format!("A detailed illustration of: {}", request.prompt),
        })
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, GenerationError> {
        Ok(FAKE_PNG.to_vec())
    }
}
