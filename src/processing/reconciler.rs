//! Callback reconciliation
//!
//! Turns a heavy worker's one-shot result into the document's terminal
//! state. Idempotent per document: repeated callbacks after a terminal
//! status are acknowledged and change nothing. A failed callback with a
//! transient code feeds the queue's retry policy; the document stays
//! PROCESSING until the attempt budget is spent.

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ingestion::{Chunker, QualityGate};
use crate::providers::{Embedder, VectorIndex};
use crate::storage::MetadataStore;
use crate::types::chunk::Chunk;
use crate::types::document::{Document, DocumentStatus};
use crate::types::job::{fail_codes, JobError};
use crate::types::profile::ProfileConfig;
use crate::types::response::{CallbackAck, CallbackPayload, ConversionResult, ReconcileOutcome};

use super::queue::ProcessingQueue;
use super::state_machine::StateMachine;

pub struct CallbackReconciler {
    store: Arc<MetadataStore>,
    state_machine: Arc<StateMachine>,
    queue: Arc<ProcessingQueue>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
}

impl CallbackReconciler {
    pub fn new(
        store: Arc<MetadataStore>,
        state_machine: Arc<StateMachine>,
        queue: Arc<ProcessingQueue>,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            store,
            state_machine,
            queue,
            embedder,
            vector_index,
        }
    }

    /// Apply a worker callback.
    pub async fn reconcile(&self, payload: &CallbackPayload) -> Result<CallbackAck> {
        payload.validate()?;
        let document_id = payload.document_id;

        let doc = self
            .store
            .get_document(document_id)?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))?;

        // Idempotence: a terminal document acknowledges without effect.
        if doc.status.is_terminal() {
            tracing::debug!(document_id = %document_id, status = doc.status.as_str(),
                "late callback for terminal document ignored");
            let outcome = if doc.status == DocumentStatus::Completed {
                ReconcileOutcome::Success
            } else {
                ReconcileOutcome::Failed
            };
            return Ok(CallbackAck {
                acknowledged: true,
                outcome,
            });
        }

        match (payload.success, &payload.result, &payload.error) {
            (true, Some(result), _) => self.apply_success(&doc, result).await,
            (false, _, Some(error)) => self.apply_failure(&doc, &error.code, &error.message),
            // validate() above rules these shapes out.
            _ => Err(Error::Validation("callback payload shape mismatch".into())),
        }
    }

    fn apply_failure(&self, doc: &Document, code: &str, message: &str) -> Result<CallbackAck> {
        let permanent = fail_codes::is_permanent(code);
        let job = self.queue.active_job_for(doc.id);

        let retries_remain = match &job {
            Some(job) => {
                let failed =
                    self.queue
                        .fail(job.id, JobError::new(code, message), permanent)?;
                failed.state == crate::types::job::JobState::Delayed
            }
            None => false,
        };

        if retries_remain {
            // The queue will re-dispatch after backoff; the document keeps
            // its PROCESSING status until the budget is spent.
            tracing::info!(document_id = %doc.id, code, "transient worker failure, job requeued");
        } else {
            self.state_machine.mark_failed(doc.id, code.to_string())?;
            let _ = self
                .store
                .record_metric(doc.id, "heavy", 0, 0, "failed");
        }

        Ok(CallbackAck {
            acknowledged: true,
            outcome: ReconcileOutcome::Failed,
        })
    }

    async fn apply_success(
        &self,
        doc: &Document,
        result: &ConversionResult,
    ) -> Result<CallbackAck> {
        let started = Instant::now();
        let profile = self.profile_for(doc);
        let job = self.queue.active_job_for(doc.id);

        let gate = QualityGate::new(profile.quality.clone());
        let assessment = gate.assess_text(&result.markdown);
        if !assessment.passed {
            let reason = assessment.reason.unwrap_or(fail_codes::NO_CONTENT);
            return self.finish_failed(doc.id, job, reason, ReconcileOutcome::QualityFailed);
        }

        let chunker = Chunker::new(profile.chunking.clone());
        let mut chunks = chunker.chunk(doc.id, &result.markdown, doc.format.category());
        if chunks.is_empty() {
            return self.finish_failed(
                doc.id,
                job,
                fail_codes::NO_CONTENT,
                ReconcileOutcome::NoContent,
            );
        }
        gate.score_chunks(&mut chunks);
        attach_pages(&mut chunks, result);

        if let Err(e) = self.embed(&mut chunks, &profile).await {
            let reason = fail_codes::with_detail(fail_codes::PROCESSING_ERROR, &e.to_string());
            return self.finish_failed(doc.id, job, &reason, ReconcileOutcome::Failed);
        }

        // Existing chunks are replaced inside the completing transaction, so
        // reprocessing can never leave duplicates behind.
        if let Err(e) = self.state_machine.complete_with_chunks(doc.id, &chunks) {
            let reason = fail_codes::with_detail(fail_codes::PROCESSING_ERROR, &e.to_string());
            return self.finish_failed(doc.id, job, &reason, ReconcileOutcome::Failed);
        }

        if let Err(e) = self.vector_index.upsert_chunks(&chunks).await {
            let _ = self.store.delete_chunks(doc.id);
            let reason = fail_codes::with_detail(fail_codes::PROCESSING_ERROR, &e.to_string());
            return self.finish_failed(doc.id, job, &reason, ReconcileOutcome::Failed);
        }

        if let Some(job) = job {
            self.queue.complete(job.id)?;
        }
        let _ = self.store.record_metric(
            doc.id,
            "heavy",
            started.elapsed().as_millis() as u64 + result.processing_time_ms,
            chunks.len(),
            "completed",
        );

        tracing::info!(
            document_id = %doc.id,
            chunks = chunks.len(),
            pages = result.page_count,
            ocr = result.ocr_applied,
            "heavy-lane document reconciled"
        );

        Ok(CallbackAck {
            acknowledged: true,
            outcome: ReconcileOutcome::Success,
        })
    }

    /// Quality and content failures are terminal regardless of remaining
    /// attempts: the conversion itself succeeded, so re-running it cannot
    /// change the verdict. The job is completed at the queue level.
    fn finish_failed(
        &self,
        document_id: Uuid,
        job: Option<crate::types::job::ProcessingJob>,
        reason: &str,
        outcome: ReconcileOutcome,
    ) -> Result<CallbackAck> {
        self.state_machine
            .mark_failed(document_id, reason.to_string())?;
        if let Some(job) = job {
            self.queue.complete(job.id)?;
        }
        let _ = self
            .store
            .record_metric(document_id, "heavy", 0, 0, "failed");
        Ok(CallbackAck {
            acknowledged: true,
            outcome,
        })
    }

    /// The frozen config travels with the job; fall back to the document's
    /// profile, then the default.
    fn profile_for(&self, doc: &Document) -> ProfileConfig {
        if let Some(job) = self.queue.active_job_for(doc.id) {
            return job.profile_config;
        }
        if let Some(profile_id) = doc.profile_id {
            if let Ok(Some(profile)) = self.store.get_profile(profile_id) {
                return profile.config;
            }
        }
        self.store
            .get_default_profile()
            .map(|p| p.config)
            .unwrap_or_else(|_| {
                ProfileConfig::from_app_config(&crate::config::AppConfig::default())
            })
    }

    async fn embed(&self, chunks: &mut [Chunk], profile: &ProfileConfig) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let batch = self.embedder.embed_batch(&texts).await?;

        if batch.dense.len() != chunks.len() {
            return Err(Error::embedding("embedding batch size mismatch"));
        }
        let expected = profile.embedding.dimension;
        for (chunk, dense) in chunks.iter_mut().zip(batch.dense) {
            if dense.len() != expected {
                return Err(Error::embedding(format!(
                    "embedding dimension {} != {}",
                    dense.len(),
                    expected
                )));
            }
            chunk.embedding = dense;
        }
        // Hybrid embedders also deliver sparse vectors; store them with the
        // chunk so the external index can serve the sparse arm.
        if let Some(sparse) = batch.sparse {
            for (chunk, sv) in chunks.iter_mut().zip(sparse) {
                chunk.sparse_embedding = Some(sv);
            }
        }
        Ok(())
    }
}

/// Rough page attribution: chunks are spread evenly across the reported
/// page count by source position.
fn attach_pages(chunks: &mut [Chunk], result: &ConversionResult) {
    if result.page_count == 0 || result.markdown.is_empty() {
        return;
    }
    let total = result.markdown.len();
    for chunk in chunks {
        let fraction = chunk.char_start as f64 / total as f64;
        let page = (fraction * result.page_count as f64) as u32 + 1;
        chunk.page = Some(page.min(result.page_count));
    }
}
