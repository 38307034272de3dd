//! Hybrid search executor with Reciprocal-Rank Fusion

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::providers::{Embedder, VectorIndex};
use crate::storage::MetadataStore;
use crate::types::query::{SearchMode, SearchRequest};
use crate::types::response::{SearchResponse, SearchResultItem, SearchResultMetadata};

use super::RankedHit;

/// A chunk's fused score plus its per-retriever sub-scores
#[derive(Debug, Clone, Copy)]
pub struct FusedHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub score: f32,
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
}

pub struct HybridSearch {
    store: Arc<MetadataStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: SearchConfig,
}

impl HybridSearch {
    pub fn new(
        store: Arc<MetadataStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            config,
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        request.validate()?;

        let per_retriever_limit = (2 * request.top_k).max(20);
        let filter = request.filter.as_ref();

        let (query_vector, query_sparse) = self.embedder.embed(&request.query_text).await?;

        let fused: Vec<FusedHit> = match request.mode {
            SearchMode::Dense => {
                // Dense-only: no fusion, raw cosine similarity, and the
                // sparse retriever is never invoked.
                let hits = self
                    .index
                    .dense_search(&query_vector, request.top_k, filter)
                    .await?;
                hits.into_iter()
                    .map(|h| FusedHit {
                        chunk_id: h.chunk_id,
                        document_id: h.document_id,
                        chunk_index: h.chunk_index,
                        score: h.score,
                        dense_score: Some(h.score),
                        sparse_score: None,
                    })
                    .collect()
            }
            SearchMode::Hybrid => {
                let (dense, sparse) = tokio::join!(
                    self.index
                        .dense_search(&query_vector, per_retriever_limit, filter),
                    self.index.sparse_search(
                        &request.query_text,
                        query_sparse.as_ref(),
                        per_retriever_limit,
                        filter,
                    ),
                );
                let alpha = request.alpha.unwrap_or(self.config.default_alpha);
                let mut fused = rrf_fuse(&dense?, &sparse?, alpha, self.config.rrf_k);
                fused.truncate(request.top_k);
                fused
            }
        };

        self.hydrate(fused).await
    }

    /// Load chunk content and document metadata for the fused hits.
    async fn hydrate(&self, hits: Vec<FusedHit>) -> Result<SearchResponse> {
        let ids: Vec<Uuid> = hits.iter().map(|h| h.chunk_id).collect();
        let chunks = self.store.get_chunks_by_ids(&ids)?;
        let by_id: HashMap<Uuid, _> = chunks.into_iter().map(|c| (c.id, c)).collect();

        let mut filenames: HashMap<Uuid, String> = HashMap::new();
        let mut results = Vec::with_capacity(hits.len());

        for hit in hits {
            let Some(chunk) = by_id.get(&hit.chunk_id) else {
                tracing::warn!(chunk_id = %hit.chunk_id, "ranked chunk missing from store");
                continue;
            };

            let filename = match filenames.get(&hit.document_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .store
                        .get_document(hit.document_id)?
                        .map(|d| d.filename)
                        .unwrap_or_default();
                    filenames.insert(hit.document_id, name.clone());
                    name
                }
            };

            results.push(SearchResultItem {
                id: chunk.id,
                document_id: chunk.document_id,
                content: chunk.content.clone(),
                score: hit.score,
                vector_score: hit.dense_score,
                keyword_score: hit.sparse_score,
                metadata: SearchResultMetadata {
                    filename,
                    chunk_index: chunk.chunk_index,
                    heading: chunk.heading.clone(),
                    breadcrumbs: chunk.breadcrumbs.clone(),
                    page: chunk.page,
                    chunk_type: chunk.chunk_type,
                },
            });
        }

        Ok(SearchResponse { results })
    }
}

/// Reciprocal-Rank Fusion over two rankings.
///
/// `score(c) = alpha * 1/(k + r_dense) + (1 - alpha) * 1/(k + r_sparse)`
/// with 1-based ranks; a candidate absent from one ranking contributes 0
/// from that side. Ties break by dense rank, then `(document_id,
/// chunk_index)` for determinism.
pub fn rrf_fuse(dense: &[RankedHit], sparse: &[RankedHit], alpha: f32, k: u32) -> Vec<FusedHit> {
    #[derive(Clone, Copy)]
    struct Entry {
        hit: RankedHit,
        dense_rank: Option<usize>,
        dense_score: Option<f32>,
        sparse_rank: Option<usize>,
        sparse_score: Option<f32>,
    }

    let mut entries: HashMap<Uuid, Entry> = HashMap::new();

    for (rank, hit) in dense.iter().enumerate() {
        entries.insert(
            hit.chunk_id,
            Entry {
                hit: *hit,
                dense_rank: Some(rank + 1),
                dense_score: Some(hit.score),
                sparse_rank: None,
                sparse_score: None,
            },
        );
    }
    for (rank, hit) in sparse.iter().enumerate() {
        entries
            .entry(hit.chunk_id)
            .and_modify(|e| {
                e.sparse_rank = Some(rank + 1);
                e.sparse_score = Some(hit.score);
            })
            .or_insert(Entry {
                hit: *hit,
                dense_rank: None,
                dense_score: None,
                sparse_rank: Some(rank + 1),
                sparse_score: Some(hit.score),
            });
    }

    let k = k as f32;
    let mut fused: Vec<(Entry, f32)> = entries
        .into_values()
        .map(|e| {
            let dense_part = e
                .dense_rank
                .map(|r| alpha / (k + r as f32))
                .unwrap_or(0.0);
            let sparse_part = e
                .sparse_rank
                .map(|r| (1.0 - alpha) / (k + r as f32))
                .unwrap_or(0.0);
            (e, dense_part + sparse_part)
        })
        .collect();

    fused.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ar = a.dense_rank.unwrap_or(usize::MAX);
                let br = b.dense_rank.unwrap_or(usize::MAX);
                ar.cmp(&br)
            })
            .then_with(|| {
                (a.hit.document_id, a.hit.chunk_index)
                    .cmp(&(b.hit.document_id, b.hit.chunk_index))
            })
    });

    fused
        .into_iter()
        .map(|(e, score)| FusedHit {
            chunk_id: e.hit.chunk_id,
            document_id: e.hit.document_id,
            chunk_index: e.hit.chunk_index,
            score,
            dense_score: e.dense_score,
            sparse_score: e.sparse_score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk: Uuid, doc: Uuid, index: u32, score: f32) -> RankedHit {
        RankedHit {
            chunk_id: chunk,
            document_id: doc,
            chunk_index: index,
            score,
        }
    }

    #[test]
    fn fusion_orders_by_reciprocal_rank_sum() {
        let doc = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        // Dense ranking: [A, B, C]; sparse ranking: [C, A, B].
        let dense = vec![
            hit(a, doc, 0, 0.9),
            hit(b, doc, 1, 0.8),
            hit(c, doc, 2, 0.7),
        ];
        let sparse = vec![
            hit(c, doc, 2, 3.0),
            hit(a, doc, 0, 2.0),
            hit(b, doc, 1, 1.0),
        ];

        let fused = rrf_fuse(&dense, &sparse, 0.5, 60);
        let order: Vec<Uuid> = fused.iter().map(|f| f.chunk_id).collect();
        assert_eq!(order, vec![a, c, b]);

        // Exact expected scores for alpha = 0.5, k = 60.
        let expect = |rd: f32, rs: f32| 0.5 / (60.0 + rd) + 0.5 / (60.0 + rs);
        assert!((fused[0].score - expect(1.0, 2.0)).abs() < 1e-6);
        assert!((fused[1].score - expect(3.0, 1.0)).abs() < 1e-6);
        assert!((fused[2].score - expect(2.0, 3.0)).abs() < 1e-6);

        // Scores are non-increasing.
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn missing_rank_contributes_zero() {
        let doc = Uuid::new_v4();
        let only_dense = Uuid::new_v4();
        let only_sparse = Uuid::new_v4();

        let dense = vec![hit(only_dense, doc, 0, 0.9)];
        let sparse = vec![hit(only_sparse, doc, 1, 5.0)];

        let fused = rrf_fuse(&dense, &sparse, 0.5, 60);
        assert_eq!(fused.len(), 2);
        for f in &fused {
            assert!((f.score - 0.5 / 61.0).abs() < 1e-6);
        }
        // Equal scores: dense-ranked candidate wins the tie-break.
        assert_eq!(fused[0].chunk_id, only_dense);
    }

    #[test]
    fn alpha_one_ignores_sparse_ranking() {
        let doc = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let dense = vec![hit(a, doc, 0, 0.9), hit(b, doc, 1, 0.8)];
        let sparse = vec![hit(b, doc, 1, 9.0), hit(a, doc, 0, 1.0)];

        let fused = rrf_fuse(&dense, &sparse, 1.0, 60);
        assert_eq!(fused[0].chunk_id, a);
        // With alpha = 1 the sparse side contributes nothing at all.
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn deterministic_tie_break_on_identical_ranks() {
        let doc_small = Uuid::from_u128(1);
        let doc_large = Uuid::from_u128(2);
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        // Repeated fusion over the same inputs must agree, even though the
        // intermediate map iterates in arbitrary order.
        let dense: Vec<RankedHit> = Vec::new();
        let sparse = vec![hit(x, doc_large, 0, 2.0), hit(y, doc_small, 0, 2.0)];
        let fused_a = rrf_fuse(&dense, &sparse, 0.0, 60);
        let fused_b = rrf_fuse(&dense, &sparse, 0.0, 60);
        assert_eq!(
            fused_a.iter().map(|f| f.chunk_id).collect::<Vec<_>>(),
            fused_b.iter().map(|f| f.chunk_id).collect::<Vec<_>>(),
        );
    }
}
