//! Hybrid search endpoint

use axum::{extract::State, Json};
use std::time::Instant;

use crate::error::Result;
use crate::types::query::SearchRequest;
use crate::types::response::SearchResponse;

use crate::server::state::AppState;

/// POST /api/query
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let started = Instant::now();
    let response = state.search().search(&request).await?;

    tracing::info!(
        mode = ?request.mode,
        top_k = request.top_k,
        results = response.results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "query served"
    );
    Ok(Json(response))
}
