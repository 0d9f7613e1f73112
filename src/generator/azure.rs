//! Azure OpenAI image generation client (DALL-E deployments)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{prepare_prompt, GeneratedImage, GenerationError, GenerationRequest, ImageGenerator};
use crate::config::GeneratorConfig;

/// Image generation request body
#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    size: &'static str,
    quality: &'static str,
    style: &'static str,
    n: u32,
}

/// Image generation response body
#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    url: Option<String>,
    revised_prompt: Option<String>,
}

/// Azure OpenAI client
#[derive(Debug)]
pub struct AzureOpenAiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    deployment: String,
    api_version: String,
    max_prompt_length: usize,
}

impl AzureOpenAiClient {
    /// Create a new client from configuration
    ///
    /// The overall call timeout is enforced by the caller; the HTTP client
    /// only bounds connection setup.
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        info!("Image generator initialized (deployment {})", config.deployment);

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
            max_prompt_length: config.max_prompt_length,
        })
    }

    fn generations_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/images/generations?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl ImageGenerator for AzureOpenAiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        let api_key = self.api_key.as_ref().ok_or(GenerationError::NotConfigured)?;
        if self.endpoint.is_empty() {
            return Err(GenerationError::NotConfigured);
        }

        let prompt = prepare_prompt(&request.prompt, self.max_prompt_length, request.art_style);
        let body = ImageRequest {
            prompt: &prompt,
            size: request.size.dimensions(),
            quality: request.quality.as_str(),
            style: request.style.as_str(),
            n: 1,
        };

        debug!(
            "Sending image generation request ({}, {}, {})",
            body.size, body.quality, body.style
        );

        let response = self
            .client
            .post(self.generations_url())
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            warn!("Image API error: {} - {}", status, message);
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ImageResponse = response.json().await?;
        let item = parsed
            .data
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyResponse)?;
        let url = item.url.ok_or(GenerationError::EmptyResponse)?;

        info!("Image generated: {}", url);

        Ok(GeneratedImage {
            url,
            revised_prompt: item.revised_prompt.unwrap_or(prompt),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, GenerationError> {
        debug!("Downloading image from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GenerationError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Download(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Download(e.to_string()))?;
        Ok(data.to_vec())
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && !self.endpoint.is_empty()
    }
}
