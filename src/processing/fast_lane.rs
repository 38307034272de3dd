//! Inline processing for text-like formats
//!
//! Fast-lane failures are deterministic on the input, so there are no
//! retries: every error is resolved into the document's state and reported
//! in the outcome, never propagated to the queue.

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::ingestion::{Chunker, QualityGate};
use crate::providers::{Embedder, VectorIndex};
use crate::storage::MetadataStore;
use crate::types::chunk::Chunk;
use crate::types::document::FileFormat;
use crate::types::job::fail_codes;
use crate::types::profile::ProfileConfig;

use super::state_machine::StateMachine;

/// Outcome of one fast-lane pass
#[derive(Debug, Clone)]
pub struct FastLaneOutcome {
    pub success: bool,
    pub chunks_created: usize,
    pub error_code: Option<String>,
}

impl FastLaneOutcome {
    fn failed(code: impl Into<String>) -> Self {
        Self {
            success: false,
            chunks_created: 0,
            error_code: Some(code.into()),
        }
    }
}

pub struct FastLaneProcessor {
    store: Arc<MetadataStore>,
    state_machine: Arc<StateMachine>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
}

impl FastLaneProcessor {
    pub fn new(
        store: Arc<MetadataStore>,
        state_machine: Arc<StateMachine>,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            store,
            state_machine,
            embedder,
            vector_index,
        }
    }

    /// Run the full inline pipeline for one document: parse, gate, chunk,
    /// embed, persist, complete.
    pub async fn process(
        &self,
        document_id: Uuid,
        content: &str,
        format: FileFormat,
        profile: &ProfileConfig,
    ) -> FastLaneOutcome {
        let started = Instant::now();
        let outcome = self.run(document_id, content, format, profile).await;

        let result_label = if outcome.success { "completed" } else { "failed" };
        let _ = self.store.record_metric(
            document_id,
            "fast",
            started.elapsed().as_millis() as u64,
            outcome.chunks_created,
            result_label,
        );
        tracing::info!(
            document_id = %document_id,
            success = outcome.success,
            chunks = outcome.chunks_created,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fast lane finished"
        );
        outcome
    }

    async fn run(
        &self,
        document_id: Uuid,
        content: &str,
        format: FileFormat,
        profile: &ProfileConfig,
    ) -> FastLaneOutcome {
        if let Err(e) = self.state_machine.begin_processing(document_id, false) {
            return FastLaneOutcome::failed(fail_codes::with_detail(
                fail_codes::PROCESSING_ERROR,
                &e.to_string(),
            ));
        }

        // JSON parses first; everything else is already text.
        let text = match format {
            FileFormat::Json => match serde_json::from_str::<serde_json::Value>(content) {
                Ok(value) => {
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| content.to_string())
                }
                Err(e) => {
                    tracing::warn!(document_id = %document_id, "invalid JSON input: {}", e);
                    return self.fail(document_id, fail_codes::INVALID_JSON.to_string());
                }
            },
            _ => content.to_string(),
        };

        let gate = QualityGate::new(profile.quality.clone());
        let assessment = gate.assess_text(&text);
        if !assessment.passed {
            let reason = assessment.reason.unwrap_or(fail_codes::NO_CONTENT);
            return self.fail(document_id, reason.to_string());
        }
        for warning in &assessment.warnings {
            tracing::warn!(document_id = %document_id, warning, noise = assessment.noise_ratio);
        }

        let chunker = Chunker::new(profile.chunking.clone());
        let mut chunks = chunker.chunk(document_id, &text, format.category());
        if chunks.is_empty() {
            return self.fail(document_id, fail_codes::NO_CONTENT.to_string());
        }
        gate.score_chunks(&mut chunks);

        if let Err(code) = self.embed(&mut chunks, profile).await {
            return self.fail(document_id, code);
        }

        match self.state_machine.complete_with_chunks(document_id, &chunks) {
            Ok(_) => {}
            Err(e) => {
                return self.fail(
                    document_id,
                    fail_codes::with_detail(fail_codes::PROCESSING_ERROR, &e.to_string()),
                )
            }
        }

        // Make the chunk set searchable in the external index, if one is
        // configured. A failure here rolls the document back to FAILED so a
        // reader never sees a COMPLETED document that cannot be searched.
        if let Err(e) = self.vector_index.upsert_chunks(&chunks).await {
            let _ = self.store.delete_chunks(document_id);
            return self.fail(
                document_id,
                fail_codes::with_detail(fail_codes::PROCESSING_ERROR, &e.to_string()),
            );
        }

        FastLaneOutcome {
            success: true,
            chunks_created: chunks.len(),
            error_code: None,
        }
    }

    /// One batched embedder call; dimension-checked.
    async fn embed(&self, chunks: &mut [Chunk], profile: &ProfileConfig) -> Result<(), String> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let batch = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| fail_codes::with_detail(fail_codes::PROCESSING_ERROR, &e.to_string()))?;

        if batch.dense.len() != chunks.len() {
            return Err(fail_codes::with_detail(
                fail_codes::PROCESSING_ERROR,
                "embedding batch size mismatch",
            ));
        }

        let expected = profile.embedding.dimension;
        for (chunk, dense) in chunks.iter_mut().zip(batch.dense) {
            if dense.len() != expected {
                return Err(fail_codes::with_detail(
                    fail_codes::PROCESSING_ERROR,
                    &format!("embedding dimension {} != {}", dense.len(), expected),
                ));
            }
            chunk.embedding = dense;
        }
        if let Some(sparse) = batch.sparse {
            for (chunk, sv) in chunks.iter_mut().zip(sparse) {
                chunk.sparse_embedding = Some(sv);
            }
        }
        Ok(())
    }

    fn fail(&self, document_id: Uuid, reason: String) -> FastLaneOutcome {
        match self.state_machine.mark_failed(document_id, reason.clone()) {
            Ok(_) => FastLaneOutcome::failed(reason),
            Err(e) => {
                tracing::error!(document_id = %document_id, "could not record failure: {}", e);
                FastLaneOutcome::failed(reason)
            }
        }
    }
}
