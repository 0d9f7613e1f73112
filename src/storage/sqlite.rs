//! SQLite image store
//!
//! Image bytes live in the `images` table next to their metadata. Content is
//! served back by the `/blobs/{key}` route, so record URLs point at this
//! server.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::{
    image_id_from_key, ImageData, ImageRecord, Metadata, ObjectStore, StorageError,
    IMAGE_MIME_TYPE,
};

type RecordRow = (String, String, i64, String, String);

/// SQLite-backed object store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    base_url: String,
}

impl SqliteStore {
    /// Open the store
    /// If path is None, uses an in-memory database (for testing)
    pub async fn open(path: Option<&str>, base_url: &str) -> Result<Self, StorageError> {
        let conn_str = match path {
            Some(p) => format!("sqlite:{}?mode=rwc", p),
            None => "sqlite::memory:".to_string(),
        };

        let options = SqliteConnectOptions::from_str(&conn_str)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Every in-memory connection is its own database, so keep exactly one alive
        let pool_options = match path {
            Some(_) => SqlitePoolOptions::new().max_connections(10),
            None => SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>),
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self {
            pool,
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        store.run_migrations().await?;

        info!("SQLite image store ready ({})", path.unwrap_or(":memory:"));
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                key TEXT PRIMARY KEY,
                image_id TEXT NOT NULL,
                data BLOB NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_created_at ON images(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Public URL for a key
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/blobs/{}", self.base_url, key)
    }

    /// Get the pool (test assertions)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn to_record(&self, row: RecordRow) -> Result<ImageRecord, StorageError> {
        let (key, image_id, size_bytes, metadata, created_at) = row;
        let metadata: Metadata = serde_json::from_str(&metadata)
            .map_err(|e| StorageError::Parse(format!("metadata for {}: {}", key, e)))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StorageError::Parse(format!("created_at for {}: {}", key, e)))?
            .with_timezone(&Utc);

        Ok(ImageRecord {
            image_id,
            url: self.url_for(&key),
            blob_name: key,
            size: size_bytes.max(0) as u64,
            created_at,
            metadata,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn upload(&self, data: &[u8], key: &str, metadata: &Metadata) -> Result<String, StorageError> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| StorageError::Parse(e.to_string()))?;

        sqlx::query(
            "INSERT INTO images (key, image_id, data, mime_type, size_bytes, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, size_bytes = excluded.size_bytes,
                 metadata = excluded.metadata",
        )
        .bind(key)
        .bind(image_id_from_key(key))
        .bind(data)
        .bind(IMAGE_MIME_TYPE)
        .bind(data.len() as i64)
        .bind(&metadata_json)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        debug!("Stored image {} ({} bytes)", key, data.len());
        Ok(self.url_for(key))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ImageRecord>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT key, image_id, size_bytes, metadata, created_at FROM images
             ORDER BY key LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| self.to_record(row)).collect()
    }

    async fn get(&self, key: &str) -> Result<Option<ImageRecord>, StorageError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT key, image_id, size_bytes, metadata, created_at FROM images WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.to_record(row)).transpose()
    }

    async fn read(&self, key: &str) -> Result<Option<ImageData>, StorageError> {
        let row: Option<(Vec<u8>, String)> =
            sqlx::query_as("SELECT data, mime_type FROM images WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(data, mime_type)| ImageData { data, mime_type }))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM images WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            info!("Image deleted: {}", key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM images WHERE created_at < ?")
            .bind(timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
