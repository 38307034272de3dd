//! Chunk type with positional and structural metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structural kind of a chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Text,
    Table,
    Code,
    Heading,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Code => "code",
            Self::Heading => "heading",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "table" => Some(Self::Table),
            "code" => Some(Self::Code),
            "heading" => Some(Self::Heading),
            _ => None,
        }
    }
}

/// Quality flags attached by the gate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    /// Ends mid-sentence without terminal punctuation
    Fragment,
    /// No heading breadcrumbs
    NoContext,
    TooShort,
    Noisy,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fragment => "FRAGMENT",
            Self::NoContext => "NO_CONTEXT",
            Self::TooShort => "TOO_SHORT",
            Self::Noisy => "NOISY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FRAGMENT" => Some(Self::Fragment),
            "NO_CONTEXT" => Some(Self::NoContext),
            "TOO_SHORT" => Some(Self::TooShort),
            "NOISY" => Some(Self::Noisy),
            _ => None,
        }
    }
}

/// Sparse embedding: sorted indices with matching values
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// A chunk of a document's Markdown rendition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    /// Owning document
    pub document_id: Uuid,
    /// 0-based, dense per document
    pub chunk_index: u32,
    /// UTF-8 slice of the source Markdown
    pub content: String,
    /// Byte offsets into the source Markdown
    pub char_start: usize,
    pub char_end: usize,
    /// Most recent heading at or above the chunk's first line
    pub heading: Option<String>,
    /// Most recent heading at each level, outermost first
    pub breadcrumbs: Vec<String>,
    /// Page number when the converter reported one
    pub page: Option<u32>,
    /// 0..1, assigned by the quality gate
    pub quality_score: f32,
    pub quality_flags: Vec<QualityFlag>,
    pub chunk_type: ChunkType,
    /// Approximate token count
    pub token_count: u32,
    /// Dense embedding of the configured dimension
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    /// Sparse embedding when the embedder produces one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sparse_embedding: Option<SparseVector>,
    pub created_at: DateTime<Utc>,
}

