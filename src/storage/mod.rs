//! Image object storage
//!
//! Images are addressed by their full storage key, `YYYY/MM/DD/<uuid>.png`.
//! The date prefix keeps listings in creation order.
//!
//! Backends:
//! - SQLite (default; also serves the bytes through `/blobs/{key}`)
//! - Azure Blob Storage over REST with a SAS token

mod azure;
mod retention;
mod sqlite;

pub use azure::AzureBlobStore;
pub use retention::spawn_retention_sweep;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, StorageBackend};

/// Content type of every stored image
pub const IMAGE_MIME_TYPE: &str = "image/png";

static KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}/\d{2}/\d{2}/[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\.png$")
        .unwrap()
});

/// Free-form string metadata attached to a stored image
pub type Metadata = BTreeMap<String, String>;

/// Stored image record, as returned by list and get
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub image_id: String,
    /// Canonical identifier (full storage key)
    pub blob_name: String,
    pub url: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// Raw image content
#[derive(Debug, Clone)]
pub struct ImageData {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed storage response: {0}")]
    Parse(String),

    #[error("invalid image key: {0}")]
    InvalidKey(String),
}

/// Object store holding generated images
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `key`, returning the public URL
    async fn upload(&self, data: &[u8], key: &str, metadata: &Metadata) -> Result<String, StorageError>;

    /// List records ordered by key
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ImageRecord>, StorageError>;

    /// Get a record by key
    async fn get(&self, key: &str) -> Result<Option<ImageRecord>, StorageError>;

    /// Read image content by key
    async fn read(&self, key: &str) -> Result<Option<ImageData>, StorageError>;

    /// Delete by key; false if absent
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete every image created before `cutoff`, returning the count
    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn health_check(&self) -> Result<(), StorageError>;

    fn backend_name(&self) -> &'static str;
}

/// Build the storage key for a new image
pub fn image_key(image_id: &Uuid, now: DateTime<Utc>) -> String {
    format!("{}/{}.png", now.format("%Y/%m/%d"), image_id)
}

/// Check that a client-supplied key has the storage key shape
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if KEY_REGEX.is_match(key) {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Image id portion of a storage key
pub fn image_id_from_key(key: &str) -> &str {
    let file = key.rsplit('/').next().unwrap_or(key);
    file.strip_suffix(".png").unwrap_or(file)
}

/// SHA-256 of image content, hex encoded
pub fn content_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Open the configured storage backend
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let store =
                SqliteStore::open(config.storage.db_path.as_deref(), &config.base_url()).await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Azure => {
            let store = AzureBlobStore::new(&config.storage.azure)?;
            store.ensure_container().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_image_key_layout() {
        let id = Uuid::parse_str("6f1c3c52-9a4e-4f7e-8a52-3b1d2e4c5a6b").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let key = image_key(&id, now);
        assert_eq!(key, "2024/03/09/6f1c3c52-9a4e-4f7e-8a52-3b1d2e4c5a6b.png");
        assert!(validate_key(&key).is_ok());
        assert_eq!(image_id_from_key(&key), "6f1c3c52-9a4e-4f7e-8a52-3b1d2e4c5a6b");
    }

    #[test]
    fn test_validate_key_rejects_other_shapes() {
        assert!(validate_key("6f1c3c52-9a4e-4f7e-8a52-3b1d2e4c5a6b").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("2024/03/09/not-a-uuid.png").is_err());
        assert!(validate_key("2024/03/09/6f1c3c52-9a4e-4f7e-8a52-3b1d2e4c5a6b.jpg").is_err());
    }

    #[test]
    fn test_content_checksum() {
        // Known SHA-256 of "test"
        assert_eq!(
            content_checksum(b"test"),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }
}
