//! ragpipe: document ingestion and retrieval dataplane
//!
//! Routes uploaded and remote-synced files through format detection,
//! dedup, a durable retrying queue, quality-gated chunking and embedding,
//! and serves dense/hybrid search with Reciprocal-Rank Fusion over the
//! results.

pub mod config;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use types::{
    chunk::Chunk,
    document::{Document, DocumentStatus, FileFormat, Lane},
    query::SearchRequest,
};
