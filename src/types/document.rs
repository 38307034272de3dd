//! Document type, format detection and routing categories

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Supported file formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Csv,
    Json,
    Txt,
    Md,
    Html,
    Epub,
}

impl FileFormat {
    /// Detect format from a MIME type, if recognized
    pub fn from_mime(mime: &str) -> Option<Self> {
        // Parameters like "; charset=utf-8" are irrelevant here.
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Some(Self::Pptx)
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(Self::Xlsx)
            }
            "text/csv" => Some(Self::Csv),
            "application/json" => Some(Self::Json),
            "text/plain" => Some(Self::Txt),
            "text/markdown" => Some(Self::Md),
            "text/html" => Some(Self::Html),
            "application/epub+zip" => Some(Self::Epub),
            _ => None,
        }
    }

    /// Detect format from a filename extension, if recognized
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "xlsx" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "txt" | "text" => Some(Self::Txt),
            "md" | "markdown" => Some(Self::Md),
            "html" | "htm" => Some(Self::Html),
            "epub" => Some(Self::Epub),
            _ => None,
        }
    }

    /// Broad category used by the chunker and search metadata
    pub fn category(&self) -> FormatCategory {
        match self {
            Self::Pdf | Self::Docx | Self::Epub => FormatCategory::Document,
            Self::Pptx => FormatCategory::Presentation,
            Self::Xlsx | Self::Csv => FormatCategory::Tabular,
            Self::Html => FormatCategory::Web,
            Self::Json | Self::Txt | Self::Md => FormatCategory::Raw,
        }
    }

    /// Routing lane: text-like formats process inline, everything else needs
    /// a conversion pass through the heavy lane.
    pub fn lane(&self) -> Lane {
        match self {
            Self::Json | Self::Txt | Self::Md => Lane::Fast,
            _ => Lane::Heavy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Html => "html",
            Self::Epub => "epub",
        }
    }
}

impl std::str::FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unknown format: {}", s))
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormatCategory {
    Document,
    Presentation,
    Tabular,
    Web,
    Raw,
}

impl FormatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Presentation => "presentation",
            Self::Tabular => "tabular",
            Self::Web => "web",
            Self::Raw => "raw",
        }
    }
}

/// Processing lane
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Processed inline by the fast-lane processor
    Fast,
    /// Routed through the queue to the external converter
    Heavy,
}

/// Document lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How the document entered the system
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Manual,
    Remote,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Remote => "REMOTE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MANUAL" => Some(Self::Manual),
            "REMOTE" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Whether the document's bytes are also tracked by a remote source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Standalone,
    Linked,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "STANDALONE",
            Self::Linked => "LINKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STANDALONE" => Some(Self::Standalone),
            "LINKED" => Some(Self::Linked),
            _ => None,
        }
    }
}

/// An ingested document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID
    pub id: Uuid,
    /// Original filename as uploaded (metadata only; on-disk name is the hash)
    pub filename: String,
    /// MIME type as received
    pub mime_type: String,
    /// File size in bytes
    pub file_size: u64,
    /// Detected format
    pub format: FileFormat,
    /// Lifecycle status
    pub status: DocumentStatus,
    /// MD5 content hash (32 hex chars, globally unique)
    pub md5_hash: String,
    /// Path of the stored file (named by content hash)
    pub file_path: PathBuf,
    /// Heavy-lane delivery attempts recorded so far
    pub retry_count: u32,
    /// Failure code plus optional detail; present iff status is FAILED
    pub fail_reason: Option<String>,
    /// Completed documents only: participates in search when true
    pub is_active: bool,
    /// How the document entered the system
    pub source_type: SourceType,
    /// Remote linkage state
    pub connection_state: ConnectionState,
    /// Remote file id (unique when set)
    pub remote_file_id: Option<String>,
    /// Remote folder id
    pub remote_folder_id: Option<String>,
    /// Last modification time reported by the remote side
    pub remote_modified_time: Option<DateTime<Utc>>,
    /// Processing profile attached at ingest time
    pub profile_id: Option<Uuid>,
    /// Number of chunks; > 0 implies COMPLETED
    pub chunk_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new PENDING document for a manual upload
    pub fn new(
        filename: String,
        mime_type: String,
        file_size: u64,
        format: FileFormat,
        md5_hash: String,
        file_path: PathBuf,
        profile_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            filename,
            mime_type,
            file_size,
            format,
            status: DocumentStatus::Pending,
            md5_hash,
            file_path,
            retry_count: 0,
            fail_reason: None,
            is_active: true,
            source_type: SourceType::Manual,
            connection_state: ConnectionState::Standalone,
            remote_file_id: None,
            remote_folder_id: None,
            remote_modified_time: None,
            profile_id,
            chunk_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Category derived from the format
    pub fn category(&self) -> FormatCategory {
        self.format.category()
    }
}

/// Compute the MD5 content hash as 32 lowercase hex characters
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}
