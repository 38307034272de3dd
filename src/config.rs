//! Configuration for the dataplane

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage paths
    #[serde(default)]
    pub storage: StorageConfig,
    /// Processing queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Default quality thresholds (seed the default processing profile)
    #[serde(default)]
    pub quality: QualityConfig,
    /// Default chunking parameters (seed the default processing profile)
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,
    /// Heavy-lane converter service
    #[serde(default)]
    pub converter: ConverterConfig,
    /// Remote folder source
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum multipart body size in bytes
    pub max_upload_size: usize,
    /// API key required on /api/* routes; None disables auth (dev mode)
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
            api_key: None,
        }
    }
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    pub db_path: PathBuf,
    /// Directory for uploaded files (stored by content hash)
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/ragpipe.db"),
            upload_dir: PathBuf::from("data/uploads"),
        }
    }
}

/// Processing queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrent active jobs per worker instance
    pub max_concurrent_jobs: usize,
    /// Per-job wall-clock deadline from reservation, in milliseconds
    pub job_timeout_ms: u64,
    /// Maximum delivery attempts per job
    pub retry_max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Completed jobs retained at least this long
    pub completed_retention_secs: u64,
    /// Completed jobs retained at least this many, regardless of age
    pub completed_retention_count: usize,
    /// Failed jobs retained this long
    pub failed_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            job_timeout_ms: 300_000, // 5 minutes
            retry_max_attempts: 3,
            retry_base_delay_ms: 5_000,
            completed_retention_secs: 3_600,
            completed_retention_count: 1_000,
            failed_retention_secs: 86_400,
        }
    }
}

impl QueueConfig {
    /// Backoff before the given attempt number (1-based): base * 2^(attempt-1)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    /// Job visibility timeout
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

/// Quality gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum content length in characters
    pub min_chars: usize,
    /// Maximum chunk length considered healthy
    pub max_chars: usize,
    /// Noise ratio above which content passes with a warning
    pub noise_warn: f32,
    /// Noise ratio above which content is rejected
    pub noise_reject: f32,
    /// Score penalty per quality flag
    pub penalty_per_flag: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_chars: 50,
            max_chars: 8_000,
            noise_warn: 0.5,
            noise_reject: 0.8,
            penalty_per_flag: 0.25,
        }
    }
}

/// Chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub target_chars: usize,
    /// Overlap carried into the next chunk (10-20% of target)
    pub overlap_chars: usize,
    /// Heading levels considered split points (1..=6)
    pub header_levels: u8,
    /// Minimum chunk size for presentation sources; smaller slides merge
    pub presentation_min_chunk_chars: usize,
    /// Rows per chunk for tabular sources
    pub tabular_rows_per_chunk: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: 1_000,
            overlap_chars: 150,
            header_levels: 3,
            presentation_min_chunk_chars: 200,
            tabular_rows_per_chunk: 50,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding service base URL
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Embedding dimensions
    pub dimension: usize,
    /// Maximum tokens per input
    pub max_tokens: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            max_tokens: 8_192,
            timeout_secs: 30,
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// RRF dampening constant
    pub rrf_k: u32,
    /// Default fusion weight toward the dense retriever
    pub default_alpha: f32,
    /// Vector index backend
    pub vector_provider: VectorProvider,
    /// External hybrid store base URL (external-hybrid provider only)
    #[serde(default)]
    pub external_endpoint: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            default_alpha: 0.5,
            vector_provider: VectorProvider::RelationalWithVectorExt,
            external_endpoint: None,
        }
    }
}

/// Vector index backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorProvider {
    /// Dense vectors inside the relational store; lexical arm via its FTS index
    #[serde(rename = "relational-with-vector-ext")]
    RelationalWithVectorExt,
    /// External hybrid-capable store (dense + sparse)
    #[serde(rename = "external-hybrid")]
    ExternalHybrid,
}

/// Heavy-lane converter service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Converter service base URL
    pub endpoint: String,
    /// Callback URL handed to the converter
    pub callback_url: String,
    /// Dispatch request timeout in seconds
    pub dispatch_timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9090".to_string(),
            callback_url: "http://localhost:8080/internal/callback".to_string(),
            dispatch_timeout_secs: 30,
        }
    }
}

/// Remote folder source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote store API base URL
    pub endpoint: String,
    /// Listing timeout per page, in seconds
    pub list_timeout_secs: u64,
    /// Download timeout per file, in seconds
    pub download_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9100".to_string(),
            list_timeout_secs: 30,
            download_timeout_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("cannot read {}: {}", p.display(), e)))?;
                toml::from_str(&text)
                    .map_err(|e| Error::Config(format!("cannot parse {}: {}", p.display(), e)))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides for the documented knobs.
    pub fn apply_env(&mut self) {
        read_env("MAX_CONCURRENT_JOBS", &mut self.queue.max_concurrent_jobs);
        read_env("JOB_TIMEOUT_MS", &mut self.queue.job_timeout_ms);
        read_env("RETRY_MAX_ATTEMPTS", &mut self.queue.retry_max_attempts);
        read_env("RETRY_BASE_DELAY_MS", &mut self.queue.retry_base_delay_ms);
        read_env("RRF_K", &mut self.search.rrf_k);
        read_env("QUALITY_MIN_CHARS", &mut self.quality.min_chars);
        read_env("QUALITY_NOISE_WARN", &mut self.quality.noise_warn);
        read_env("QUALITY_NOISE_REJECT", &mut self.quality.noise_reject);
        read_env("EMBEDDING_DIMENSION", &mut self.embedding.dimension);

        if let Ok(dir) = std::env::var("UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Ok(provider) = std::env::var("VECTOR_PROVIDER") {
            match provider.as_str() {
                "relational-with-vector-ext" => {
                    self.search.vector_provider = VectorProvider::RelationalWithVectorExt
                }
                "external-hybrid" => {
                    self.search.vector_provider = VectorProvider::ExternalHybrid
                }
                other => tracing::warn!("ignoring unknown VECTOR_PROVIDER: {}", other),
            }
        }
        if let Ok(key) = std::env::var("API_KEY") {
            if !key.is_empty() {
                self.server.api_key = Some(key);
            }
        }
    }
}

fn read_env<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!("ignoring unparseable {}: {}", name, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.queue.max_concurrent_jobs, 5);
        assert_eq!(cfg.queue.retry_max_attempts, 3);
        assert_eq!(cfg.search.rrf_k, 60);
        assert_eq!(cfg.quality.min_chars, 50);
        assert!((cfg.quality.noise_warn - 0.5).abs() < f32::EPSILON);
        assert!((cfg.quality.noise_reject - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.backoff_for_attempt(1), Duration::from_secs(5));
        assert_eq!(cfg.backoff_for_attempt(2), Duration::from_secs(10));
        assert_eq!(cfg.backoff_for_attempt(3), Duration::from_secs(20));
    }

    #[test]
    fn toml_roundtrip_with_overrides() {
        let text = r#"
            [queue]
            max_concurrent_jobs = 2
            job_timeout_ms = 60000
            retry_max_attempts = 1
            retry_base_delay_ms = 100
            completed_retention_secs = 60
            completed_retention_count = 10
            failed_retention_secs = 60

            [search]
            rrf_k = 10
            default_alpha = 0.7
            vector_provider = "external-hybrid"
        "#;
        let cfg: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.queue.max_concurrent_jobs, 2);
        assert_eq!(cfg.search.vector_provider, VectorProvider::ExternalHybrid);
        // Sections absent from the file fall back to defaults.
        assert_eq!(cfg.chunking.target_chars, 1_000);
    }
}
