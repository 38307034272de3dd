//! Document upload, lookup, listing and deletion

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ingestion::IntakeRequest;
use crate::storage::DocumentListQuery;
use crate::types::document::{ConnectionState, DocumentStatus, SourceType};
use crate::types::response::{
    DocumentListResponse, DocumentSummary, OpResponse, UploadResponse,
};

use crate::server::state::AppState;

/// Optional JSON options accompanying an upload
#[derive(Debug, Default, Deserialize)]
pub struct UploadOptions {
    #[serde(rename = "profileId")]
    pub profile_id: Option<Uuid>,
}

/// POST /api/documents - multipart upload
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut options = UploadOptions::default();
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "options" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("unreadable options field: {}", e)))?;
                options = serde_json::from_slice(&data)
                    .map_err(|e| Error::Validation(format!("invalid options JSON: {}", e)))?;
            }
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::Validation("file field has no filename".into()))?;
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("unreadable file field: {}", e)))?;
                file = Some((filename, mime_type, data.to_vec()));
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    let (filename, mime_type, bytes) =
        file.ok_or_else(|| Error::Validation("multipart field 'file' is required".into()))?;

    let (profile_id, profile) = state.resolve_upload_profile(options.profile_id)?;

    let (doc, decision) = state
        .intake()
        .admit(IntakeRequest {
            filename,
            mime_type,
            bytes,
            profile_id,
            profile,
            remote: None,
        })
        .await?;

    tracing::info!(
        document_id = %doc.id,
        filename = %doc.filename,
        format = %doc.format,
        lane = ?decision.lane,
        "document accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: doc.id,
            filename: doc.filename,
            status: doc.status,
            format: doc.format,
            lane: decision.lane,
        }),
    ))
}

/// GET /api/documents/:id
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentSummary>> {
    let id = parse_document_id(&id)?;
    let doc = state
        .store()
        .get_document(id)?
        .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;
    Ok(Json(DocumentSummary::from(&doc)))
}

/// Listing query parameters
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub search: Option<String>,
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
    #[serde(rename = "sortOrder")]
    pub sort_order: Option<String>,
    #[serde(rename = "sourceType")]
    pub source_type: Option<String>,
    #[serde(rename = "connectionState")]
    pub connection_state: Option<String>,
}

/// GET /api/documents
pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentListResponse>> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            DocumentStatus::parse(s)
                .ok_or_else(|| Error::Validation(format!("unknown status: {}", s)))
        })
        .transpose()?;
    let source_type = params
        .source_type
        .as_deref()
        .map(|s| {
            SourceType::parse(s).ok_or_else(|| Error::Validation(format!("unknown sourceType: {}", s)))
        })
        .transpose()?;
    let connection_state = params
        .connection_state
        .as_deref()
        .map(|s| {
            ConnectionState::parse(s)
                .ok_or_else(|| Error::Validation(format!("unknown connectionState: {}", s)))
        })
        .transpose()?;

    let limit = params.limit.unwrap_or(20);
    if limit == 0 || limit > 100 {
        return Err(Error::Validation(format!(
            "limit must be in 1..=100, got {}",
            limit
        )));
    }

    let sort_desc = match params.sort_order.as_deref() {
        None | Some("desc") => true,
        Some("asc") => false,
        Some(other) => {
            return Err(Error::Validation(format!("unknown sortOrder: {}", other)))
        }
    };

    let (documents, total, counts) = state.store().list_documents(&DocumentListQuery {
        status,
        search: params.search,
        source_type,
        connection_state,
        sort_by: params.sort_by,
        sort_desc,
        limit,
        offset: params.offset.unwrap_or(0),
    })?;

    Ok(Json(DocumentListResponse {
        documents: documents.iter().map(DocumentSummary::from).collect(),
        total,
        counts,
    }))
}

/// DELETE /api/documents/:id
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OpResponse>> {
    let id = parse_document_id(&id)?;
    let doc = state
        .store()
        .get_document(id)?
        .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;

    if doc.connection_state == ConnectionState::Linked {
        return Err(Error::StateConflict(
            "document is linked to a remote file; its lifecycle is sync-driven".into(),
        ));
    }

    state.vector_index().delete_document(id).await?;
    let doc = state.store().delete_document(id)?;
    if let Err(e) = std::fs::remove_file(&doc.file_path) {
        tracing::warn!(document_id = %id, "stored file not removed: {}", e);
    }

    tracing::info!(document_id = %id, "document deleted");
    Ok(Json(OpResponse {
        ok: true,
        detail: None,
    }))
}

fn parse_document_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidId(raw.to_string()))
}
