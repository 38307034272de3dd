//! Embedding provider

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::types::chunk::SparseVector;

/// One batch of embeddings. `sparse` is present only for hybrid-capable
/// models; when present it is index-aligned with `dense`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub dense: Vec<Vec<f32>>,
    pub sparse: Option<Vec<SparseVector>>,
}

/// Trait for generating text embeddings
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts in one request.
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<(Vec<f32>, Option<SparseVector>)> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        let dense = batch
            .dense
            .pop()
            .ok_or_else(|| Error::embedding("empty batch response"))?;
        let sparse = batch.sparse.and_then(|mut s| s.pop());
        Ok((dense, sparse))
    }

    /// Dense vector dimension
    fn dimension(&self) -> usize;

    /// Whether the model also produces sparse vectors
    fn supports_sparse(&self) -> bool;

    fn model_id(&self) -> &str;

    async fn health_check(&self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// HTTP embedder
// ---------------------------------------------------------------------------

/// Embedding client for an Ollama-compatible HTTP service.
///
/// Transient transport failures (connect errors, timeouts) get one internal
/// retry; HTTP-level errors surface immediately.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.endpoint))
            .json(&serde_json::json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::embedding(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response.json().await?;
        if body.embeddings.len() != texts.len() {
            return Err(Error::embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        for embedding in &body.embeddings {
            if embedding.len() != self.dimension {
                return Err(Error::embedding(format!(
                    "embedding dimension {} does not match configured {}",
                    embedding.len(),
                    self.dimension
                )));
            }
        }

        Ok(EmbeddingBatch {
            dense: body.embeddings,
            sparse: None,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch::default());
        }

        match self.request(texts).await {
            Ok(batch) => Ok(batch),
            Err(Error::Http(e)) if e.is_timeout() || e.is_connect() => {
                tracing::warn!("embedding request failed transiently, retrying once: {}", e);
                self.request(texts).await
            }
            Err(e) => Err(e),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn supports_sparse(&self) -> bool {
        false
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await;
        Ok(matches!(response, Ok(r) if r.status().is_success()))
    }
}

// ---------------------------------------------------------------------------
// Static embedder
// ---------------------------------------------------------------------------

/// Deterministic feature-hashed embeddings: no model download, no network.
/// Useful for offline runs and tests; also doubles as the sparse producer
/// (token hash -> count) to exercise the hybrid path.
pub struct StaticEmbedder {
    dimension: usize,
    sparse: bool,
}

impl StaticEmbedder {
    pub fn new(dimension: usize, sparse: bool) -> Self {
        Self { dimension, sparse }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let h = fnv1a(token.as_bytes());
            let slot = (h as usize) % self.dimension;
            // Signed hashing reduces collision bias.
            let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn sparse_one(&self, text: &str) -> SparseVector {
        let mut counts: std::collections::BTreeMap<u32, f32> = std::collections::BTreeMap::new();
        for token in tokens(text) {
            let index = (fnv1a(token.as_bytes()) % 100_000) as u32;
            *counts.entry(index).or_insert(0.0) += 1.0;
        }
        SparseVector {
            indices: counts.keys().copied().collect(),
            values: counts.values().copied().collect(),
        }
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let dense = texts.iter().map(|t| self.embed_one(t)).collect();
        let sparse = self
            .sparse
            .then(|| texts.iter().map(|t| self.sparse_one(t)).collect());
        Ok(EmbeddingBatch { dense, sparse })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn supports_sparse(&self) -> bool {
        self.sparse
    }

    fn model_id(&self) -> &str {
        "static-feature-hash"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_embedder_is_deterministic_and_normalized() {
        let e = StaticEmbedder::new(64, false);
        let a = e.embed("rust ingestion pipeline").await.unwrap().0;
        let b = e.embed("rust ingestion pipeline").await.unwrap().0;
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let e = StaticEmbedder::new(256, false);
        let base = e.embed("document ingestion queue retry").await.unwrap().0;
        let near = e.embed("ingestion queue with retry logic").await.unwrap().0;
        let far = e.embed("banana smoothie recipe blender").await.unwrap().0;

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&base, &near) > dot(&base, &far));
    }

    #[tokio::test]
    async fn sparse_batch_is_aligned() {
        let e = StaticEmbedder::new(32, true);
        let batch = e
            .embed_batch(&["alpha beta".into(), "gamma".into()])
            .await
            .unwrap();
        assert_eq!(batch.dense.len(), 2);
        let sparse = batch.sparse.unwrap();
        assert_eq!(sparse.len(), 2);
        assert_eq!(sparse[0].indices.len(), 2);
        // Indices are sorted per the wire contract.
        assert!(sparse[0].indices.windows(2).all(|w| w[0] < w[1]));
    }
}
