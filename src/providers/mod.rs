//! Provider abstractions for the external collaborators
//!
//! Trait-based seams for the embedding model, the vector index, the
//! heavy-lane converter and the remote folder store, so backends can be
//! swapped without touching the orchestration code.

pub mod converter;
pub mod embedding;
pub mod remote;
pub mod vector_index;

pub use converter::{ConverterClient, HttpConverter};
pub use embedding::{Embedder, EmbeddingBatch, HttpEmbedder, StaticEmbedder};
pub use remote::{HttpRemoteSource, RemoteSource};
pub use vector_index::{ExternalHybridIndex, SqliteVectorIndex, VectorIndex};
