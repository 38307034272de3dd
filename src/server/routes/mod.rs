//! API routes

pub mod callback;
pub mod documents;
pub mod jobs;
pub mod profiles;
pub mod query;
pub mod sync;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use super::state::AppState;

/// Build the `/api` subtree.
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Documents
        .route(
            "/documents",
            post(documents::upload_document).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/documents", get(documents::list_documents))
        .route("/documents/:id", get(documents::get_document))
        .route("/documents/:id", delete(documents::delete_document))
        // Search
        .route("/query", post(query::query))
        // Queue introspection
        .route("/jobs", get(jobs::list_jobs))
        // Profiles
        .route("/profiles", get(profiles::list_profiles))
        .route("/profiles", post(profiles::create_profile))
        .route("/profiles/:id", get(profiles::get_profile))
        .route("/profiles/:id", delete(profiles::delete_profile))
        // Remote folder sync
        .route("/sync/bindings", get(sync::list_bindings))
        .route("/sync/bindings", post(sync::create_binding))
        .route("/sync/bindings/:id", get(sync::get_binding))
        .route("/sync/bindings/:id/run", post(sync::run_sync))
}
