//! Image endpoints
//!
//! GET    /images?limit&offset - List stored images
//! GET    /images/{key}        - Image record by storage key
//! DELETE /images/{key}        - Delete by storage key
//! GET    /blobs/{key}         - Serve image content

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::storage::{image_id_from_key, validate_key, ImageRecord};
use crate::workflow::WorkflowError;

/// Largest page a client may request
const MAX_PAGE_SIZE: usize = 100;

/// Build the images router (mounted under the API prefix)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/images", get(list_images))
        .route("/images/{*key}", get(get_image).delete(delete_image))
}

/// Build the blob content router
pub fn blob_router() -> Router<AppState> {
    Router::new().route("/blobs/{*key}", get(serve_blob))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
struct ImageListResponse {
    images: Vec<ImageRecord>,
    total: usize,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    message: &'static str,
    image_id: String,
    blob_name: String,
}

async fn list_images(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ImageListResponse>, WorkflowError> {
    let Query(query) = query?;
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let images = state.store.list(limit, query.offset).await?;
    Ok(Json(ImageListResponse {
        total: images.len(),
        images,
    }))
}

async fn get_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ImageRecord>, WorkflowError> {
    validate_key(&key)?;
    state
        .store
        .get(&key)
        .await?
        .map(Json)
        .ok_or(WorkflowError::NotFound(key))
}

async fn delete_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, WorkflowError> {
    validate_key(&key)?;
    if !state.store.delete(&key).await? {
        return Err(WorkflowError::NotFound(key));
    }
    Ok(Json(DeleteResponse {
        message: "Image deleted",
        image_id: image_id_from_key(&key).to_string(),
        blob_name: key,
    }))
}

/// Serve image content by storage key
async fn serve_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, WorkflowError> {
    validate_key(&key)?;
    match state.store.read(&key).await? {
        Some(image) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, image.mime_type),
                (
                    header::CACHE_CONTROL,
                    "public, max-age=31536000, immutable".to_string(),
                ),
            ],
            image.data,
        )
            .into_response()),
        None => Err(WorkflowError::NotFound(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::generator::AzureOpenAiClient;
    use crate::storage::{image_key, Metadata, ObjectStore, SqliteStore};

    async fn app_with_image() -> (Router, String) {
        let config = Config::default();
        let generator = Arc::new(AzureOpenAiClient::new(&config.generator).unwrap());
        let store = Arc::new(SqliteStore::open(None, &config.base_url()).await.unwrap());

        let key = image_key(&Uuid::new_v4(), Utc::now());
        let mut metadata = Metadata::new();
        metadata.insert("prompt".to_string(), "a red balloon".to_string());
        store.upload(b"\x89PNG", &key, &metadata).await.unwrap();

        let app = super::super::router(
            AppState::new(&config, generator, store),
            &config.allowed_origins,
        );
        (app, key)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_list_images() {
        let (app, key) = app_with_image().await;
        let (status, body) = send(
            app,
            Request::get("/api/v1/images?limit=5").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["total"], 1);
        assert_eq!(body["images"][0]["blob_name"], key.as_str());
        assert_eq!(body["images"][0]["metadata"]["prompt"], "a red balloon");
    }

    #[tokio::test]
    async fn test_get_image_by_key() {
        let (app, key) = app_with_image().await;
        let (status, body) = send(
            app,
            Request::get(format!("/api/v1/images/{}", key))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["image_id"], image_id_from_key(&key));
        assert_eq!(body["size"], 4);
    }

    #[tokio::test]
    async fn test_get_image_invalid_key() {
        let (app, _) = app_with_image().await;
        let (status, _) = send(
            app,
            Request::get("/api/v1/images/not-a-key").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (app, _) = app_with_image().await;
        let missing = image_key(&Uuid::new_v4(), Utc::now());
        let (status, body) = send(
            app,
            Request::delete(format!("/api/v1/images/{}", missing))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().contains(&missing));
    }

    #[tokio::test]
    async fn test_delete_then_get() {
        let (app, key) = app_with_image().await;
        let (status, _) = send(
            app.clone(),
            Request::delete(format!("/api/v1/images/{}", key))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            app,
            Request::get(format!("/api/v1/images/{}", key))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_blob() {
        let (app, key) = app_with_image().await;
        let response = app
            .oneshot(
                Request::get(format!("/blobs/{}", key))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"\x89PNG");
    }
}
