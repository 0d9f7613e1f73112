//! Generation endpoints
//!
//! POST /generate            - generate and store one image
//! POST /generate/variations - generate several style variations

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use super::AppState;
use crate::generator::GenerationRequest;
use crate::workflow::{GenerationResult, WorkflowError};

/// Build the generation router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/generate/variations", post(generate_variations))
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResult>, WorkflowError> {
    let Json(request) = payload?;
    let result = state.workflow.run(&request).await?;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
struct VariationsResponse {
    images: Vec<GenerationResult>,
    total: usize,
}

async fn generate_variations(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<VariationsResponse>, WorkflowError> {
    let Json(request) = payload?;
    let images = state.workflow.run_variations(&request).await?;
    Ok(Json(VariationsResponse {
        total: images.len(),
        images,
    }))
}
