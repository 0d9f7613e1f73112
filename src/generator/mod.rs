//! Text-to-image generation
//!
//! Provides:
//! - Request types (size, quality, style, art style templates)
//! - Prompt pre-processing
//! - The `ImageGenerator` trait and the Azure OpenAI implementation

mod azure;

pub use azure::AzureOpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Prompts already asking for an art form are not wrapped in the default template
const STYLE_KEYWORDS: [&str; 4] = ["painting", "illustration", "art style", "digital art"];

/// Output image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1792x1024")]
    Landscape,
    #[serde(rename = "1024x1792")]
    Portrait,
}

impl ImageSize {
    /// Get dimensions string
    pub fn dimensions(&self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Landscape => "1792x1024",
            ImageSize::Portrait => "1024x1792",
        }
    }
}

/// Rendering quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Standard,
    Hd,
}

impl ImageQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageQuality::Standard => "standard",
            ImageQuality::Hd => "hd",
        }
    }
}

/// Rendering style understood by the generation API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    #[default]
    Vivid,
    Natural,
}

impl ImageStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStyle::Vivid => "vivid",
            ImageStyle::Natural => "natural",
        }
    }
}

/// Art style template prepended to the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtStyle {
    Realistic,
    Anime,
    Watercolor,
    OilPainting,
    Sketch,
    Fantasy,
    Cyberpunk,
    Impressionist,
}

impl ArtStyle {
    /// Prompt prefix for this style
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtStyle::Realistic => "Highly detailed, photorealistic",
            ArtStyle::Anime => "Anime style, vibrant colors, detailed",
            ArtStyle::Watercolor => "Watercolor painting style, soft colors",
            ArtStyle::OilPainting => "Oil painting style, classical art",
            ArtStyle::Sketch => "Pencil sketch style, detailed linework",
            ArtStyle::Fantasy => "Fantasy art style, magical, ethereal",
            ArtStyle::Cyberpunk => "Cyberpunk style, neon lights, futuristic",
            ArtStyle::Impressionist => "Impressionist painting style",
        }
    }
}

/// A single text-to-image request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub size: ImageSize,
    #[serde(default)]
    pub quality: ImageQuality,
    #[serde(default)]
    pub style: ImageStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art_style: Option<ArtStyle>,
    /// Number of variations (only read by the variations endpoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variations: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: ImageSize::default(),
            quality: ImageQuality::default(),
            style: ImageStyle::default(),
            art_style: None,
            variations: None,
        }
    }

    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_style(mut self, style: ImageStyle) -> Self {
        self.style = style;
        self
    }

    /// Reject empty or oversized prompts
    pub fn validate(&self, max_prompt_length: usize) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        let length = self.prompt.chars().count();
        if length > max_prompt_length {
            return Err(format!(
                "prompt is {} characters, maximum is {}",
                length, max_prompt_length
            ));
        }
        Ok(())
    }
}

/// Result of a successful generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Temporary provider URL the image can be downloaded from
    pub url: String,
    pub revised_prompt: String,
}

/// Image generation errors
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("image generation API not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no image in response")]
    EmptyResponse,

    #[error("image download failed: {0}")]
    Download(String),
}

/// A remote text-to-image service
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image for the request
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError>;

    /// Fetch the bytes of a generated image
    async fn download(&self, url: &str) -> Result<Vec<u8>, GenerationError>;

    /// Check if credentials are present
    fn is_configured(&self) -> bool {
        true
    }
}

/// Prepare a user prompt for the generation API
///
/// Truncates to `max_length` characters, trims, then applies the art style
/// template, or the default illustration template when the prompt does not
/// already name an art form.
pub fn prepare_prompt(prompt: &str, max_length: usize, art_style: Option<ArtStyle>) -> String {
    let mut prompt = prompt;
    if let Some((cut, _)) = prompt.char_indices().nth(max_length) {
        prompt = &prompt[..cut];
        warn!("Prompt truncated to {} characters", max_length);
    }
    let prompt = prompt.trim();

    if let Some(style) = art_style {
        return format!("{}: {}", style.prefix(), prompt);
    }

    let lower = prompt.to_lowercase();
    if STYLE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        prompt.to_string()
    } else {
        format!("A detailed illustration of: {}", prompt)
    }
}
