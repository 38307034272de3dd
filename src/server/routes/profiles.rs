//! Processing profile management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::profile::{ProcessingProfile, ProfileConfig};
use crate::types::response::OpResponse;

use crate::server::state::AppState;

/// GET /api/profiles
pub async fn list_profiles(State(state): State<AppState>) -> Result<Json<Vec<ProcessingProfile>>> {
    Ok(Json(state.store().list_profiles()?))
}

/// GET /api/profiles/:id
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProcessingProfile>> {
    let id = parse_id(&id)?;
    let profile = state
        .store()
        .get_profile(id)?
        .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub name: String,
    /// Full parameter bundle; omitted sections inherit the default profile.
    #[serde(default)]
    pub config: Option<ProfileConfig>,
}

/// POST /api/profiles
pub async fn create_profile(
    State(state): State<AppState>,
    Json(request): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<ProcessingProfile>)> {
    if request.name.trim().is_empty() {
        return Err(Error::Validation("profile name must not be empty".into()));
    }

    let config = match request.config {
        Some(config) => config,
        None => state.store().get_default_profile()?.config,
    };

    let profile = ProcessingProfile::new(request.name, config);
    state.store().insert_profile(&profile)?;
    tracing::info!(profile_id = %profile.id, name = %profile.name, "profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub confirm: bool,
}

/// DELETE /api/profiles/:id?confirm=true
///
/// Deleting a profile with attached documents needs the confirm flag; the
/// default profile is never deletable.
pub async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<OpResponse>> {
    let id = parse_id(&id)?;
    state.store().delete_profile(id, params.confirm)?;
    tracing::info!(profile_id = %id, "profile deleted");
    Ok(Json(OpResponse {
        ok: true,
        detail: None,
    }))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidId(raw.to_string()))
}
