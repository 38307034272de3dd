//! Vector index provider
//!
//! Two backends behind one trait: the relational store itself (dense
//! vectors as blobs, lexical arm via its FTS index) and an external
//! hybrid-capable store reached over HTTP.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::retrieval::RankedHit;
use crate::storage::MetadataStore;
use crate::types::chunk::{Chunk, SparseVector};
use crate::types::query::SearchFilter;

/// Trait over the chunk-level index used by hybrid search
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Make a document's chunk set searchable. Called after the chunks are
    /// durably persisted in the metadata store.
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Remove a document's chunks from the index.
    async fn delete_document(&self, document_id: Uuid) -> Result<()>;

    /// Dense retrieval; hits come back sorted, higher score first.
    async fn dense_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>>;

    /// Sparse/lexical retrieval; hits come back sorted, higher score first.
    /// `sparse_vector` is used by hybrid-capable stores; lexical backends
    /// rank on `query_text`.
    async fn sparse_search(
        &self,
        query_text: &str,
        sparse_vector: Option<&SparseVector>,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>>;
}

// ---------------------------------------------------------------------------
// Relational-with-vector-ext backend
// ---------------------------------------------------------------------------

/// Index living inside the metadata store: the single-transaction chunk
/// insert already made everything durable, so upsert/delete are no-ops and
/// search delegates to the store's scan and FTS queries.
pub struct SqliteVectorIndex {
    store: Arc<MetadataStore>,
}

impl SqliteVectorIndex {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert_chunks(&self, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    async fn delete_document(&self, _document_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn dense_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>> {
        self.store.dense_search(query_vector, limit, filter)
    }

    async fn sparse_search(
        &self,
        query_text: &str,
        _sparse_vector: Option<&SparseVector>,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>> {
        self.store.lexical_search(query_text, limit, filter)
    }
}

// ---------------------------------------------------------------------------
// External hybrid backend
// ---------------------------------------------------------------------------

/// Client for an external hybrid-capable vector store (dense + sparse).
/// Vectors are shipped through the store's JSON API as typed arrays; no
/// string-assembled payloads.
pub struct ExternalHybridIndex {
    client: reqwest::Client,
    endpoint: String,
    collection: String,
}

#[derive(Debug, Deserialize)]
struct ExternalHit {
    chunk_id: Uuid,
    document_id: Uuid,
    chunk_index: u32,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct ExternalSearchResponse {
    hits: Vec<ExternalHit>,
}

impl ExternalHybridIndex {
    pub fn new(endpoint: &str, collection: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
        })
    }

    fn url(&self, op: &str) -> String {
        format!("{}/collections/{}/{}", self.endpoint, self.collection, op)
    }

    async fn search(&self, body: serde_json::Value) -> Result<Vec<RankedHit>> {
        let response = self
            .client
            .post(self.url("search"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::VectorIndex(format!(
                "search returned {}",
                response.status()
            )));
        }
        let parsed: ExternalSearchResponse = response.json().await?;
        Ok(parsed
            .hits
            .into_iter()
            .map(|h| RankedHit {
                chunk_id: h.chunk_id,
                document_id: h.document_id,
                chunk_index: h.chunk_index,
                score: h.score,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for ExternalHybridIndex {
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let points: Vec<serde_json::Value> = chunks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "document_id": c.document_id,
                    "chunk_index": c.chunk_index,
                    "dense": c.embedding,
                    "sparse": c.sparse_embedding,
                })
            })
            .collect();

        let response = self
            .client
            .post(self.url("points"))
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::VectorIndex(format!(
                "upsert returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<()> {
        let response = self
            .client
            .post(self.url("delete"))
            .json(&serde_json::json!({ "document_id": document_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::VectorIndex(format!(
                "delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn dense_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>> {
        self.search(serde_json::json!({
            "dense": query_vector,
            "limit": limit,
            "filter": filter,
        }))
        .await
    }

    async fn sparse_search(
        &self,
        query_text: &str,
        sparse_vector: Option<&SparseVector>,
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RankedHit>> {
        self.search(serde_json::json!({
            "sparse": sparse_vector,
            "text": query_text,
            "limit": limit,
            "filter": filter,
        }))
        .await
    }
}
