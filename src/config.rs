//! Server configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then `ARTD_`-prefixed environment variables (`__` separates sections).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ARTD_";

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Externally visible base URL, used to build links to locally stored blobs
    pub public_url: Option<String>,
    /// CORS origins; empty means any origin
    pub allowed_origins: Vec<String>,
    pub generator: GeneratorConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            public_url: None,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            generator: GeneratorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()
    }

    /// Base URL clients should use to reach this server
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind_addr),
        }
    }
}

/// Image generation API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Azure OpenAI resource endpoint, e.g. `https://myres.openai.azure.com`
    pub endpoint: String,
    pub api_key: Option<String>,
    pub deployment: String,
    pub api_version: String,
    pub max_prompt_length: usize,
    pub generation_timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            deployment: "dall-e-3".to_string(),
            api_version: "2024-02-01".to_string(),
            max_prompt_length: 4000,
            generation_timeout_secs: 120,
            upload_timeout_secs: 60,
        }
    }
}

impl GeneratorConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Which object store implementation backs the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Azure,
}

/// Object storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database path; None = in-memory
    pub db_path: Option<String>,
    pub azure: AzureBlobConfig,
    /// Delete images older than this many days; None disables the sweep
    pub retention_days: Option<u32>,
    pub sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_path: None,
            azure: AzureBlobConfig::default(),
            retention_days: None,
            sweep_interval_secs: 3600,
        }
    }
}

/// Azure Blob Storage settings (SAS token auth)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureBlobConfig {
    /// e.g. `https://myaccount.blob.core.windows.net`
    pub account_url: String,
    pub container: String,
    /// SAS token without the leading `?`
    pub sas_token: String,
}

impl Default for AzureBlobConfig {
    fn default() -> Self {
        Self {
            account_url: String::new(),
            container: "generated-images".to_string(),
            sas_token: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.generator.max_prompt_length, 4000);
        assert_eq!(config.generator.generation_timeout(), Duration::from_secs(120));
        assert_eq!(config.generator.upload_timeout(), Duration::from_secs(60));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.azure.container, "generated-images");
    }

    #[test]
    fn test_load_from_toml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "artd.toml",
                r#"
                bind_addr = "0.0.0.0:9000"

                [generator]
                deployment = "dall-e-3-hd"
                generation_timeout_secs = 30

                [storage]
                backend = "azure"
                retention_days = 30
                "#,
            )?;
            jail.set_env("ARTD_GENERATOR__API_KEY", "secret");
            jail.set_env("ARTD_STORAGE__AZURE__CONTAINER", "scenes");

            let config = Config::load(Some(Path::new("artd.toml")))?;
            assert_eq!(config.bind_addr.port(), 9000);
            assert_eq!(config.generator.deployment, "dall-e-3-hd");
            assert_eq!(config.generator.generation_timeout_secs, 30);
            assert_eq!(config.generator.upload_timeout_secs, 60);
            assert_eq!(config.generator.api_key.as_deref(), Some("secret"));
            assert_eq!(config.storage.backend, StorageBackend::Azure);
            assert_eq!(config.storage.retention_days, Some(30));
            assert_eq!(config.storage.azure.container, "scenes");
            Ok(())
        });
    }

    #[test]
    fn test_base_url() {
        let mut config = Config::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:8000");

        config.public_url = Some("https://artelligence.shop/".to_string());
        assert_eq!(config.base_url(), "https://artelligence.shop");
    }
}
