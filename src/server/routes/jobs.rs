//! Queue introspection

use axum::{extract::State, Json};
use serde_json::json;

use crate::error::Result;

use crate::server::state::AppState;

/// GET /api/jobs - queue counts plus the most recent jobs
pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let counts = state.queue().counts();
    let jobs: Vec<serde_json::Value> = state
        .queue()
        .recent_jobs(50)
        .into_iter()
        .map(|job| {
            json!({
                "id": job.id,
                "documentId": job.document_id,
                "state": job.state,
                "attemptsMade": job.attempts_made,
                "maxAttempts": job.max_attempts,
                "nextRunAt": job.next_run_at,
                "lastError": job.last_error,
                "createdAt": job.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "counts": counts, "jobs": jobs })))
}
