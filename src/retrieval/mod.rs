//! Retrieval: candidate ranking and hybrid fusion

pub mod search;

pub use search::HybridSearch;

use uuid::Uuid;

/// A chunk reference scored by one retriever. `score` is higher-is-better
/// for every retriever (cosine for dense, sign-flipped bm25 for lexical).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub score: f32,
}
