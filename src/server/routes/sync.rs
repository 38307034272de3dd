//! Remote folder binding management and sync triggering

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::remote::{RemoteFolderBinding, SyncReport};

use crate::server::state::AppState;

/// GET /api/sync/bindings
pub async fn list_bindings(
    State(state): State<AppState>,
) -> Result<Json<Vec<RemoteFolderBinding>>> {
    Ok(Json(state.store().list_bindings()?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBindingRequest {
    #[serde(rename = "remoteFolderId")]
    pub remote_folder_id: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(rename = "profileId", default)]
    pub profile_id: Option<Uuid>,
}

/// POST /api/sync/bindings
pub async fn create_binding(
    State(state): State<AppState>,
    Json(request): Json<CreateBindingRequest>,
) -> Result<(StatusCode, Json<RemoteFolderBinding>)> {
    if request.remote_folder_id.trim().is_empty() {
        return Err(Error::Validation("remoteFolderId must not be empty".into()));
    }
    if let Some(profile_id) = request.profile_id {
        if state.store().get_profile(profile_id)?.is_none() {
            return Err(Error::ProfileNotFound(profile_id.to_string()));
        }
    }

    let binding = RemoteFolderBinding::new(
        request.remote_folder_id,
        request.recursive,
        request.profile_id,
    );
    state.store().insert_binding(&binding)?;
    tracing::info!(binding_id = %binding.id, folder = %binding.remote_folder_id, "binding created");
    Ok((StatusCode::CREATED, Json(binding)))
}

/// GET /api/sync/bindings/:id
pub async fn get_binding(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemoteFolderBinding>> {
    let id = parse_id(&id)?;
    let binding = state
        .store()
        .get_binding(id)?
        .ok_or_else(|| Error::BindingNotFound(id.to_string()))?;
    Ok(Json(binding))
}

/// POST /api/sync/bindings/:id/run
///
/// Runs one sync pass inline and returns the report. A sync already in
/// flight for the binding answers 409.
pub async fn run_sync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncReport>> {
    let id = parse_id(&id)?;
    let report = state.synchronizer().sync(id).await?;
    Ok(Json(report))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidId(raw.to_string()))
}
