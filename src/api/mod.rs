//! HTTP API module - REST endpoints and WebSocket

mod generate;
mod images;
mod websocket;

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::generator::ImageGenerator;
use crate::storage::{ObjectStore, StorageError};
use crate::workflow::{Workflow, WorkflowError};
pub use websocket::{ClientMessage, ConnectionRegistry, ServerEvent, Session};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub generator: Arc<dyn ImageGenerator>,
    pub connections: Arc<ConnectionRegistry>,
    pub workflow: Arc<Workflow>,
}

impl AppState {
    /// Wire the workflow and registry around a generator and a store
    pub fn new(
        config: &Config,
        generator: Arc<dyn ImageGenerator>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let workflow = Arc::new(Workflow::new(
            generator.clone(),
            store.clone(),
            connections.clone(),
            &config.generator,
        ));

        Self {
            store,
            generator,
            connections,
            workflow,
        }
    }
}

/// Build the API router
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/ws/{client_id}", get(websocket::ws_handler))
        .nest("/api/v1", generate::router().merge(images::router()))
        .merge(images::blob_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkflowError::Storage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            WorkflowError::Generation(_) | WorkflowError::Storage(_) => StatusCode::BAD_GATEWAY,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// Malformed bodies and query strings share the `{"error"}` shape and 400
impl From<JsonRejection> for WorkflowError {
    fn from(rejection: JsonRejection) -> Self {
        WorkflowError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for WorkflowError {
    fn from(rejection: QueryRejection) -> Self {
        WorkflowError::Validation(rejection.body_text())
    }
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "artd",
        version: env!("CARGO_PKG_VERSION"),
        message: "Welcome to Artelligence API",
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    message: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let generator = if state.generator.is_configured() {
        "configured"
    } else {
        "not_configured"
    };

    let (status, health, storage) = match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, "healthy", "ok"),
        Err(e) => {
            warn!("Storage health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "error")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: health,
            service: "artd",
            timestamp: Utc::now(),
            storage,
            storage_backend: state.store.backend_name(),
            generator,
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: DateTime<Utc>,
    storage: &'static str,
    storage_backend: &'static str,
    generator: &'static str,
}

/// Connection and generation counters
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.workflow.stats();
    Json(MetricsResponse {
        active_websocket_connections: state.connections.connection_count().await,
        generations_completed: stats.generations_completed,
        generations_failed: stats.generations_failed,
        timestamp: Utc::now(),
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    active_websocket_connections: usize,
    generations_completed: u64,
    generations_failed: u64,
    timestamp: DateTime<Utc>,
}
