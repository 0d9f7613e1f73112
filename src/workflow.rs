//! Generate → upload workflow
//!
//! One run validates the request, calls the image generator, downloads the
//! result and stores it. Each remote phase has its own timeout. A failure in
//! any phase ends the run; nothing is retried.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ConnectionRegistry, ServerEvent};
use crate::config::GeneratorConfig;
use crate::generator::{GenerationError, GenerationRequest, ImageGenerator, ImageStyle};
use crate::storage::{content_checksum, image_key, Metadata, ObjectStore, StorageError};

/// Variations produced when the request does not say
pub const DEFAULT_VARIATIONS: u32 = 3;
/// Upper bound on variations per request
pub const MAX_VARIATIONS: u32 = 4;

/// Workflow phase bounded by a timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Generation,
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Generation => write!(f, "image generation"),
            Phase::Upload => write!(f, "image upload"),
        }
    }
}

/// Workflow errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{phase} timed out after {}s", .limit.as_secs())]
    Timeout { phase: Phase, limit: Duration },

    #[error("image generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("image storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("image not found: {0}")]
    NotFound(String),
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub image_id: String,
    /// Temporary provider URL
    pub image_url: String,
    /// Permanent storage URL
    pub blob_url: String,
    /// Storage key
    pub blob_name: String,
    pub prompt: String,
    pub revised_prompt: String,
    pub created_at: DateTime<Utc>,
    pub status: &'static str,
}

/// Counters exposed on `/metrics`
#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of workflow counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkflowStats {
    pub generations_completed: u64,
    pub generations_failed: u64,
}

/// Runs generation requests against a generator and a store
pub struct Workflow {
    generator: Arc<dyn ImageGenerator>,
    store: Arc<dyn ObjectStore>,
    connections: Arc<ConnectionRegistry>,
    max_prompt_length: usize,
    generation_timeout: Duration,
    upload_timeout: Duration,
    counters: Counters,
}

impl Workflow {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        store: Arc<dyn ObjectStore>,
        connections: Arc<ConnectionRegistry>,
        config: &GeneratorConfig,
    ) -> Self {
        Self {
            generator,
            store,
            connections,
            max_prompt_length: config.max_prompt_length,
            generation_timeout: config.generation_timeout(),
            upload_timeout: config.upload_timeout(),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> WorkflowStats {
        WorkflowStats {
            generations_completed: self.counters.completed.load(Ordering::Relaxed),
            generations_failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Run synchronously: one result or one error
    pub async fn run(&self, request: &GenerationRequest) -> Result<GenerationResult, WorkflowError> {
        self.validate(request)?;
        self.execute(request, None).await
    }

    /// Run with progress events pushed to `client_id`
    ///
    /// Sends `processing`, then `saving` once the image exists, then exactly
    /// one of `completed` or `error`. A request that fails validation only
    /// gets the `error` event.
    pub async fn run_streaming(
        &self,
        client_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, WorkflowError> {
        if let Err(e) = self.validate(request) {
            self.connections
                .send(client_id, ServerEvent::error(e.to_string()))
                .await;
            return Err(e);
        }

        self.connections
            .send(client_id, ServerEvent::processing())
            .await;

        let outcome = self.execute(request, Some(client_id)).await;
        let event = match &outcome {
            Ok(result) => ServerEvent::completed(result),
            Err(e) => ServerEvent::error(e.to_string()),
        };
        self.connections.send(client_id, event).await;
        outcome
    }

    /// Run several variations concurrently, alternating vivid and natural styles
    ///
    /// Returns the successful results; fails only when every variation failed.
    pub async fn run_variations(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<GenerationResult>, WorkflowError> {
        let count = request.variations.unwrap_or(DEFAULT_VARIATIONS);
        if count == 0 || count > MAX_VARIATIONS {
            return Err(WorkflowError::Validation(format!(
                "variations must be between 1 and {}",
                MAX_VARIATIONS
            )));
        }
        self.validate(request)?;

        let requests: Vec<GenerationRequest> = (0..count)
            .map(|i| {
                let style = if i % 2 == 0 {
                    ImageStyle::Vivid
                } else {
                    ImageStyle::Natural
                };
                request.clone().with_style(style)
            })
            .collect();

        let outcomes = join_all(requests.iter().map(|r| self.execute(r, None))).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Variation failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        info!("Generated {}/{} variations", results.len(), count);
        match first_error {
            Some(e) if results.is_empty() => Err(e),
            _ => Ok(results),
        }
    }

    fn validate(&self, request: &GenerationRequest) -> Result<(), WorkflowError> {
        request
            .validate(self.max_prompt_length)
            .map_err(WorkflowError::Validation)
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        progress: Option<&str>,
    ) -> Result<GenerationResult, WorkflowError> {
        let outcome = self.generate_and_store(request, progress).await;
        match &outcome {
            Ok(result) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!("Image generated successfully: {}", result.image_id);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Error generating image: {}", e);
            }
        }
        outcome
    }

    async fn generate_and_store(
        &self,
        request: &GenerationRequest,
        progress: Option<&str>,
    ) -> Result<GenerationResult, WorkflowError> {
        let image_id = Uuid::new_v4();
        info!("Starting image generation for ID: {}", image_id);

        let generated = tokio::time::timeout(self.generation_timeout, self.generator.generate(request))
            .await
            .map_err(|_| WorkflowError::Timeout {
                phase: Phase::Generation,
                limit: self.generation_timeout,
            })??;

        debug!("Image {} generated at URL: {}", image_id, generated.url);

        if let Some(client_id) = progress {
            self.connections.send(client_id, ServerEvent::saving()).await;
        }

        let created_at = Utc::now();
        let key = image_key(&image_id, created_at);

        let blob_url = tokio::time::timeout(self.upload_timeout, async {
            let data = self.generator.download(&generated.url).await?;

            let mut metadata = Metadata::new();
            metadata.insert("image_id".to_string(), image_id.to_string());
            metadata.insert("prompt".to_string(), request.prompt.clone());
            metadata.insert("size".to_string(), request.size.dimensions().to_string());
            metadata.insert("quality".to_string(), request.quality.as_str().to_string());
            metadata.insert("style".to_string(), request.style.as_str().to_string());
            metadata.insert("sha256".to_string(), content_checksum(&data));
            metadata.insert(
                "created_at".to_string(),
                created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            );

            let url = self.store.upload(&data, &key, &metadata).await?;
            Ok::<_, WorkflowError>(url)
        })
        .await
        .map_err(|_| WorkflowError::Timeout {
            phase: Phase::Upload,
            limit: self.upload_timeout,
        })??;

        Ok(GenerationResult {
            image_id: image_id.to_string(),
            image_url: generated.url,
            blob_url,
            blob_name: key,
            prompt: request.prompt.clone(),
            revised_prompt: generated.revised_prompt,
            created_at,
            status: "completed",
        })
    }
}
