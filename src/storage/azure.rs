//! Azure Blob Storage backend
//!
//! Talks to the Blob REST API directly, authenticated by a SAS token
//! appended to every request URL. Listings are XML and are paged with
//! `NextMarker`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    image_id_from_key, ImageData, ImageRecord, Metadata, ObjectStore, StorageError,
    IMAGE_MIME_TYPE,
};
use crate::config::AzureBlobConfig;

const API_VERSION: &str = "2021-08-06";
const META_HEADER_PREFIX: &str = "x-ms-meta-";
/// Blobs requested per listing page
const PAGE_SIZE: usize = 1000;

/// `List Blobs` response body
#[derive(Debug, Deserialize)]
#[serde(rename = "EnumerationResults")]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
struct BlobItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    properties: BlobProperties,
    #[serde(rename = "Metadata", default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Creation-Time", default)]
    creation_time: Option<String>,
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
    #[serde(rename = "Content-Length", default)]
    content_length: u64,
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_listing(xml: &str) -> Result<EnumerationResults, StorageError> {
    quick_xml::de::from_str(xml).map_err(|e| StorageError::Parse(e.to_string()))
}

/// Metadata header values must be visible ASCII; anything else is skipped
fn header_safe(value: &str) -> bool {
    value.bytes().all(|b| (0x20..0x7f).contains(&b))
}

/// Azure Blob Storage object store
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    client: Client,
    container_url: String,
    sas_token: String,
}

impl AzureBlobStore {
    /// Create a client for the configured container
    pub fn new(config: &AzureBlobConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            container_url: format!(
                "{}/{}",
                config.account_url.trim_end_matches('/'),
                config.container
            ),
            sas_token: config.sas_token.trim_start_matches('?').to_string(),
        })
    }

    /// Public blob URL (without the SAS token)
    pub fn blob_url(&self, key: &str) -> String {
        format!("{}/{}", self.container_url, key)
    }

    fn signed(&self, url: String, query: &str) -> String {
        let mut parts = Vec::with_capacity(2);
        if !query.is_empty() {
            parts.push(query);
        }
        if !self.sas_token.is_empty() {
            parts.push(self.sas_token.as_str());
        }
        if parts.is_empty() {
            url
        } else {
            format!("{}?{}", url, parts.join("&"))
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("x-ms-version", API_VERSION)
    }

    async fn check(response: Response) -> Result<Response, StorageError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        warn!("Blob storage error: {} - {}", status, message);
        Err(StorageError::Api { status, message })
    }

    /// Create the container if it does not exist
    pub async fn ensure_container(&self) -> Result<(), StorageError> {
        let url = self.signed(self.container_url.clone(), "restype=container");
        let response = self.request(self.client.put(url)).send().await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        Self::check(response).await?;
        info!("Container created: {}", self.container_url);
        Ok(())
    }

    async fn list_page(&self, marker: Option<&str>) -> Result<EnumerationResults, StorageError> {
        let query = format!(
            "restype=container&comp=list&include=metadata&maxresults={}",
            PAGE_SIZE
        );
        let url = self.signed(self.container_url.clone(), &query);
        let mut builder = self.request(self.client.get(url));
        if let Some(marker) = marker {
            builder = builder.query(&[("marker", marker)]);
        }
        let response = Self::check(builder.send().await?).await?;
        parse_listing(&response.text().await?)
    }

    /// Walk every blob in key order, stopping when `visit` returns false
    async fn walk<F>(&self, mut visit: F) -> Result<(), StorageError>
    where
        F: FnMut(BlobItem) -> bool + Send,
    {
        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(marker.as_deref()).await?;
            for item in page.blobs.items {
                if !visit(item) {
                    return Ok(());
                }
            }
            match page.next_marker.filter(|m| !m.is_empty()) {
                Some(next) => marker = Some(next),
                None => return Ok(()),
            }
        }
    }

    fn to_record(&self, item: BlobItem) -> ImageRecord {
        let created_at = item
            .properties
            .creation_time
            .as_deref()
            .or(item.properties.last_modified.as_deref())
            .and_then(parse_http_date)
            .unwrap_or_else(Utc::now);

        ImageRecord {
            image_id: item
                .metadata
                .get("image_id")
                .cloned()
                .unwrap_or_else(|| image_id_from_key(&item.name).to_string()),
            url: self.blob_url(&item.name),
            size: item.properties.content_length,
            created_at,
            metadata: item.metadata,
            blob_name: item.name,
        }
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn upload(&self, data: &[u8], key: &str, metadata: &Metadata) -> Result<String, StorageError> {
        let url = self.signed(self.blob_url(key), "");
        let mut builder = self
            .request(self.client.put(url))
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-blob-content-type", IMAGE_MIME_TYPE)
            .header("x-ms-blob-cache-control", "no-cache")
            .body(data.to_vec());

        for (name, value) in metadata {
            if header_safe(value) {
                builder = builder.header(format!("{}{}", META_HEADER_PREFIX, name), value);
            } else {
                debug!("Skipping non-ASCII metadata field {} for {}", name, key);
            }
        }

        Self::check(builder.send().await?).await?;

        let blob_url = self.blob_url(key);
        info!("Image uploaded to: {}", blob_url);
        Ok(blob_url)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ImageRecord>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut skipped = 0;
        let mut items = Vec::new();
        self.walk(|item| {
            if skipped < offset {
                skipped += 1;
                return true;
            }
            items.push(item);
            items.len() < limit
        })
        .await?;

        let images: Vec<ImageRecord> = items.into_iter().map(|item| self.to_record(item)).collect();
        debug!("Listed {} images", images.len());
        Ok(images)
    }

    async fn get(&self, key: &str) -> Result<Option<ImageRecord>, StorageError> {
        let url = self.signed(self.blob_url(key), "");
        let response = self.request(self.client.head(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let headers = response.headers();

        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let metadata: Metadata = headers
            .iter()
            .filter_map(|(name, value)| {
                let field = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
                Some((field.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();

        Ok(Some(ImageRecord {
            image_id: metadata
                .get("image_id")
                .cloned()
                .unwrap_or_else(|| image_id_from_key(key).to_string()),
            blob_name: key.to_string(),
            url: self.blob_url(key),
            size: header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            created_at: header("x-ms-creation-time")
                .or(header("last-modified"))
                .and_then(parse_http_date)
                .unwrap_or_else(Utc::now),
            metadata,
        }))
    }

    async fn read(&self, key: &str) -> Result<Option<ImageData>, StorageError> {
        let url = self.signed(self.blob_url(key), "");
        let response = self.request(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let mime_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(IMAGE_MIME_TYPE)
            .to_string();
        let data = response.bytes().await?.to_vec();
        Ok(Some(ImageData { data, mime_type }))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let url = self.signed(self.blob_url(key), "");
        let response = self.request(self.client.delete(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        info!("Image deleted: {}", key);
        Ok(true)
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut expired = Vec::new();
        self.walk(|item| {
            let created = item
                .properties
                .creation_time
                .as_deref()
                .and_then(parse_http_date);
            if matches!(created, Some(at) if at < cutoff) {
                expired.push(item.name);
            }
            true
        })
        .await?;

        let mut deleted = 0;
        for key in expired {
            if self.delete(&key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let url = self.signed(
            self.container_url.clone(),
            "restype=container&comp=list&maxresults=1",
        );
        Self::check(self.request(self.client.get(url)).send().await?).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "azure"
    }
}
