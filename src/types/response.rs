//! API response and callback payload types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::document::{Document, DocumentStatus, FileFormat, Lane};
use crate::error::{Error, Result};

/// Response to a successful upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub filename: String,
    pub status: DocumentStatus,
    pub format: FileFormat,
    pub lane: Lane,
}

/// Document detail as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub filename: String,
    pub status: DocumentStatus,
    pub format: FileFormat,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    #[serde(rename = "retryCount")]
    pub retry_count: u32,
    #[serde(rename = "failReason", skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
    #[serde(rename = "chunkCount")]
    pub chunk_count: u32,
    #[serde(rename = "sourceType")]
    pub source_type: super::document::SourceType,
    #[serde(rename = "connectionState")]
    pub connection_state: super::document::ConnectionState,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename.clone(),
            status: doc.status,
            format: doc.format,
            file_size: doc.file_size,
            retry_count: doc.retry_count,
            fail_reason: doc.fail_reason.clone(),
            chunk_count: doc.chunk_count,
            source_type: doc.source_type,
            connection_state: doc.connection_state,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

/// Paged document listing
#[derive(Debug, Clone, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
    /// Document counts per status
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// One fused search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: Uuid,
    #[serde(rename = "documentId")]
    pub document_id: Uuid,
    pub content: String,
    /// Fused score (hybrid) or cosine similarity (dense mode)
    pub score: f32,
    /// Dense retriever sub-score
    #[serde(rename = "vectorScore")]
    pub vector_score: Option<f32>,
    /// Lexical retriever sub-score
    #[serde(rename = "keywordScore")]
    pub keyword_score: Option<f32>,
    pub metadata: SearchResultMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultMetadata {
    pub filename: String,
    #[serde(rename = "chunkIndex")]
    pub chunk_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub breadcrumbs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(rename = "chunkType")]
    pub chunk_type: super::chunk::ChunkType,
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
}

/// Reconciliation outcome reported back to the caller of the callback route
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Success,
    Failed,
    QualityFailed,
    NoContent,
}

/// Response body of the callback route
#[derive(Debug, Clone, Serialize)]
pub struct CallbackAck {
    pub acknowledged: bool,
    pub outcome: ReconcileOutcome,
}

/// Successful conversion result delivered by the heavy worker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionResult {
    pub markdown: String,
    #[serde(rename = "pageCount")]
    pub page_count: u32,
    #[serde(rename = "ocrApplied")]
    pub ocr_applied: bool,
    #[serde(rename = "processingTimeMs")]
    pub processing_time_ms: u64,
}

/// Failure delivered by the heavy worker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionError {
    pub code: String,
    pub message: String,
}

/// The callback payload (bit-exact wire shape)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackPayload {
    #[serde(rename = "documentId")]
    pub document_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ConversionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ConversionError>,
}

impl CallbackPayload {
    /// Shape validation beyond what serde enforces: the success flag decides
    /// which of `result` / `error` must be present.
    pub fn validate(&self) -> Result<()> {
        match (self.success, &self.result, &self.error) {
            (true, Some(_), _) => Ok(()),
            (false, _, Some(_)) => Ok(()),
            (true, None, _) => Err(Error::Validation(
                "success callback requires a result payload".into(),
            )),
            (false, _, None) => Err(Error::Validation(
                "failure callback requires an error payload".into(),
            )),
        }
    }
}

/// Generic detail payload for operational endpoints
#[derive(Debug, Clone, Serialize)]
pub struct OpResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_shape_validation() {
        let ok: CallbackPayload = serde_json::from_value(serde_json::json!({
            "documentId": Uuid::new_v4(),
            "success": true,
            "result": {"markdown": "# A", "pageCount": 1, "ocrApplied": false, "processingTimeMs": 10}
        }))
        .unwrap();
        assert!(ok.validate().is_ok());

        let missing_result: CallbackPayload = serde_json::from_value(serde_json::json!({
            "documentId": Uuid::new_v4(),
            "success": true
        }))
        .unwrap();
        assert!(missing_result.validate().is_err());

        let failure: CallbackPayload = serde_json::from_value(serde_json::json!({
            "documentId": Uuid::new_v4(),
            "success": false,
            "error": {"code": "TIMEOUT", "message": "worker timed out"}
        }))
        .unwrap();
        assert!(failure.validate().is_ok());
    }
}
