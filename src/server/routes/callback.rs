//! Internal worker callback endpoint

use axum::{extract::State, Json};

use crate::error::Result;
use crate::types::response::{CallbackAck, CallbackPayload};

use crate::server::state::AppState;

/// POST /internal/callback
///
/// Receives the heavy worker's one-shot result and hands it to the
/// reconciler. Unknown document ids answer 404; malformed payload shapes
/// answer 400.
pub async fn worker_callback(
    State(state): State<AppState>,
    Json(payload): Json<CallbackPayload>,
) -> Result<Json<CallbackAck>> {
    tracing::debug!(
        document_id = %payload.document_id,
        success = payload.success,
        "worker callback received"
    );
    let ack = state.reconciler().reconcile(&payload).await?;
    Ok(Json(ack))
}
