//! Processing profiles: frozen parameter bundles attached to documents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{AppConfig, ChunkingConfig, QualityConfig};

/// PDF converter selection for the heavy lane
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PdfConverter {
    Fast,
    HighQuality,
}

/// OCR behavior for the heavy lane
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PdfOcrMode {
    Auto,
    Force,
    Never,
}

/// Conversion parameters handed to the converter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionParams {
    pub pdf_converter: PdfConverter,
    pub pdf_ocr_mode: PdfOcrMode,
    pub pdf_ocr_languages: Vec<String>,
    pub table_row_limit: u32,
    pub table_col_limit: u32,
    pub max_file_size_mb: u64,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            pdf_converter: PdfConverter::Fast,
            pdf_ocr_mode: PdfOcrMode::Auto,
            pdf_ocr_languages: vec!["eng".to_string()],
            table_row_limit: 1_000,
            table_col_limit: 64,
            max_file_size_mb: 50,
        }
    }
}

/// Chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingParams {
    pub target_chars: usize,
    pub overlap_chars: usize,
    pub header_levels: u8,
    pub presentation_min_chunk_chars: usize,
    pub tabular_rows_per_chunk: usize,
}

impl From<&ChunkingConfig> for ChunkingParams {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            target_chars: c.target_chars,
            overlap_chars: c.overlap_chars,
            header_levels: c.header_levels,
            presentation_min_chunk_chars: c.presentation_min_chunk_chars,
            tabular_rows_per_chunk: c.tabular_rows_per_chunk,
        }
    }
}

/// Quality gate parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityParams {
    pub min_chars: usize,
    pub max_chars: usize,
    pub noise_warn: f32,
    pub noise_reject: f32,
    pub penalty_per_flag: f32,
    pub auto_fix_enabled: bool,
    pub auto_fix_max_passes: u32,
}

impl From<&QualityConfig> for QualityParams {
    fn from(q: &QualityConfig) -> Self {
        Self {
            min_chars: q.min_chars,
            max_chars: q.max_chars,
            noise_warn: q.noise_warn,
            noise_reject: q.noise_reject,
            penalty_per_flag: q.penalty_per_flag,
            auto_fix_enabled: false,
            auto_fix_max_passes: 1,
        }
    }
}

/// System-fixed embedding parameters (read-only on profiles)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingParams {
    pub model_id: String,
    pub dimension: usize,
    pub max_tokens: usize,
}

/// The parameter bundle frozen into jobs at enqueue time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    pub conversion: ConversionParams,
    pub chunking: ChunkingParams,
    pub quality: QualityParams,
    pub embedding: EmbeddingParams,
}

impl ProfileConfig {
    /// Bundle built from application defaults; used to seed the default profile.
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            conversion: ConversionParams::default(),
            chunking: ChunkingParams::from(&cfg.chunking),
            quality: QualityParams::from(&cfg.quality),
            embedding: EmbeddingParams {
                model_id: cfg.embedding.model.clone(),
                dimension: cfg.embedding.dimension,
                max_tokens: cfg.embedding.max_tokens,
            },
        }
    }

    /// Size limit in bytes derived from the conversion params
    pub fn max_file_size_bytes(&self) -> u64 {
        self.conversion.max_file_size_mb * 1024 * 1024
    }
}

/// A stored processing profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingProfile {
    pub id: Uuid,
    pub name: String,
    pub config: ProfileConfig,
    /// Exactly one profile is the default
    pub is_default: bool,
    /// The system "current" profile offered to new uploads
    pub is_active: bool,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingProfile {
    pub fn new(name: String, config: ProfileConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            config,
            is_default: false,
            is_active: false,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }
}
