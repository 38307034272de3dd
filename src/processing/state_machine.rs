//! Document status transitions
//!
//! This is the only code that mutates `documents.status`. Every transition
//! runs under the store's optimistic lock, retries once on a concurrent
//! change and records a row in the transition log.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind};
use crate::storage::{MetadataStore, StatusChange};
use crate::types::chunk::Chunk;
use crate::types::document::{Document, DocumentStatus};
use crate::types::job::fail_codes;

pub struct StateMachine {
    store: Arc<MetadataStore>,
    events: EventBus,
}

impl StateMachine {
    pub fn new(store: Arc<MetadataStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// PENDING -> PROCESSING on worker pickup. A document already in
    /// PROCESSING is left alone (idempotent pickup); `record_attempt` bumps
    /// the delivery counter either way.
    pub fn begin_processing(&self, document_id: Uuid, record_attempt: bool) -> Result<Document> {
        self.with_retry(document_id, |doc| {
            match doc.status {
                DocumentStatus::Pending => Some(StatusChange {
                    to: DocumentStatus::Processing,
                    reason: "worker pickup".into(),
                    fail_reason: None,
                    clear_chunks: false,
                    increment_retry: record_attempt,
                }),
                DocumentStatus::Processing if record_attempt => Some(StatusChange {
                    to: DocumentStatus::Processing,
                    reason: "delivery attempt".into(),
                    fail_reason: None,
                    clear_chunks: false,
                    increment_retry: true,
                }),
                DocumentStatus::Processing => None,
                // Terminal states reach PROCESSING only through an explicit
                // sync-driven reset, never through pickup.
                DocumentStatus::Completed | DocumentStatus::Failed => None,
            }
        })
    }

    /// -> FAILED with a mandatory reason.
    pub fn mark_failed(&self, document_id: Uuid, fail_reason: String) -> Result<Document> {
        self.with_retry(document_id, move |doc| {
            if doc.status == DocumentStatus::Failed && doc.fail_reason.as_deref() == Some(&fail_reason) {
                return None;
            }
            Some(StatusChange {
                to: DocumentStatus::Failed,
                reason: fail_reason.clone(),
                fail_reason: Some(fail_reason.clone()),
                clear_chunks: false,
                increment_retry: false,
            })
        })
    }

    /// PROCESSING -> COMPLETED with the full chunk set, atomically. The
    /// chunk-count invariant is enforced by the store in the same
    /// transaction that flips the status.
    pub fn complete_with_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<Document> {
        let doc = self.load(document_id)?;
        if doc.status == DocumentStatus::Completed {
            return Ok(doc);
        }
        if doc.status != DocumentStatus::Processing {
            return Err(Error::StateConflict(format!(
                "cannot complete document {} from {}",
                document_id,
                doc.status.as_str()
            )));
        }

        let result = self
            .store
            .complete_with_chunks(document_id, doc.updated_at, chunks, "processing complete");

        let refreshed = match result {
            Ok(d) => d,
            Err(Error::StateConflict(_)) => {
                // One concurrent-change retry, then give up.
                let doc = self.load(document_id)?;
                if doc.status == DocumentStatus::Completed {
                    return Ok(doc);
                }
                self.store
                    .complete_with_chunks(document_id, doc.updated_at, chunks, "processing complete")
                    .map_err(conflict_to_code)?
            }
            Err(e) => return Err(e),
        };

        self.emit(&doc.status, &refreshed, "processing complete");
        Ok(refreshed)
    }

    /// Terminal -> PENDING, sync-driven only: clears the fail reason and
    /// drops existing chunks so the document reprocesses from scratch.
    pub fn reset_for_reprocess(&self, document_id: Uuid) -> Result<Document> {
        self.with_retry(document_id, |doc| {
            if doc.status == DocumentStatus::Pending {
                return None;
            }
            Some(StatusChange {
                to: DocumentStatus::Pending,
                reason: "remote update: reprocess".into(),
                fail_reason: None,
                clear_chunks: true,
                increment_retry: false,
            })
        })
    }

    /// FAILED(REMOVED_FROM_REMOTE) -> COMPLETED when the remote file came
    /// back unchanged. Only valid while the chunk set is still present.
    pub fn restore_after_remote_return(&self, document_id: Uuid) -> Result<Document> {
        let doc = self.load(document_id)?;
        if doc.status != DocumentStatus::Failed
            || doc.fail_reason.as_deref() != Some(fail_codes::REMOVED_FROM_REMOTE)
        {
            return Ok(doc);
        }
        if doc.chunk_count == 0 {
            return Err(Error::StateConflict(format!(
                "document {} has no chunks to restore",
                document_id
            )));
        }
        self.with_retry(document_id, |doc| {
            if doc.status != DocumentStatus::Failed {
                return None;
            }
            Some(StatusChange {
                to: DocumentStatus::Completed,
                reason: "remote file restored".into(),
                fail_reason: None,
                clear_chunks: false,
                increment_retry: false,
            })
        })
    }

    fn load(&self, document_id: Uuid) -> Result<Document> {
        self.store
            .get_document(document_id)?
            .ok_or_else(|| Error::DocumentNotFound(document_id.to_string()))
    }

    /// Apply a change computed from the current row; on an optimistic-lock
    /// conflict, reload and retry exactly once.
    fn with_retry<F>(&self, document_id: Uuid, decide: F) -> Result<Document>
    where
        F: Fn(&Document) -> Option<StatusChange>,
    {
        for attempt in 0..2 {
            let doc = self.load(document_id)?;
            let Some(change) = decide(&doc) else {
                return Ok(doc); // no-op transition
            };

            match self
                .store
                .apply_status_change(document_id, doc.updated_at, &change)
            {
                Ok(refreshed) => {
                    self.emit(&doc.status, &refreshed, &change.reason);
                    return Ok(refreshed);
                }
                Err(Error::StateConflict(_)) if attempt == 0 => continue,
                Err(Error::StateConflict(msg)) => {
                    return Err(Error::StateConflict(fail_codes::with_detail(
                        fail_codes::STATE_CONFLICT,
                        &msg,
                    )))
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("both transition attempts returned")
    }

    fn emit(&self, from: &DocumentStatus, doc: &Document, reason: &str) {
        if *from != doc.status {
            self.events.emit(EventKind::DocumentStatusChanged {
                document_id: doc.id,
                from: *from,
                to: doc.status,
                reason: reason.to_string(),
            });
        }
    }
}

fn conflict_to_code(e: Error) -> Error {
    match e {
        Error::StateConflict(msg) => Error::StateConflict(fail_codes::with_detail(
            fail_codes::STATE_CONFLICT,
            &msg,
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chunk::ChunkType;
    use crate::types::document::FileFormat;
    use chrono::Utc;
    use std::path::PathBuf;

    fn machine() -> (StateMachine, Arc<MetadataStore>) {
        let store = Arc::new(MetadataStore::in_memory().unwrap());
        (StateMachine::new(store.clone(), EventBus::new()), store)
    }

    fn insert_doc(store: &MetadataStore) -> Document {
        let doc = Document::new(
            "a.md".into(),
            "text/markdown".into(),
            10,
            FileFormat::Md,
            format!("{:x}", md5::compute(Uuid::new_v4().as_bytes())),
            PathBuf::from("/tmp/x"),
            None,
        );
        store.insert_document(&doc).unwrap();
        doc
    }

    fn chunk(document_id: Uuid, index: u32) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id,
            chunk_index: index,
            content: "content of the chunk.".into(),
            char_start: index as usize * 10,
            char_end: index as usize * 10 + 9,
            heading: None,
            breadcrumbs: Vec::new(),
            page: None,
            quality_score: 1.0,
            quality_flags: Vec::new(),
            chunk_type: ChunkType::Text,
            token_count: 5,
            embedding: vec![1.0, 0.0],
            sparse_embedding: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pending_processing_completed_path() {
        let (sm, store) = machine();
        let doc = insert_doc(&store);

        let d = sm.begin_processing(doc.id, true).unwrap();
        assert_eq!(d.status, DocumentStatus::Processing);
        assert_eq!(d.retry_count, 1);

        let d = sm.complete_with_chunks(doc.id, &[chunk(doc.id, 0)]).unwrap();
        assert_eq!(d.status, DocumentStatus::Completed);
        assert_eq!(d.chunk_count, 1);
        assert!(d.fail_reason.is_none());
    }

    #[test]
    fn failed_requires_reason_and_is_recorded() {
        let (sm, store) = machine();
        let doc = insert_doc(&store);
        sm.begin_processing(doc.id, false).unwrap();

        let d = sm.mark_failed(doc.id, "NO_CONTENT".into()).unwrap();
        assert_eq!(d.status, DocumentStatus::Failed);
        assert_eq!(d.fail_reason.as_deref(), Some("NO_CONTENT"));

        let transitions = store.list_transitions(doc.id).unwrap();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[1].1, "FAILED");
    }

    #[test]
    fn completion_from_pending_is_rejected() {
        let (sm, store) = machine();
        let doc = insert_doc(&store);
        let err = sm.complete_with_chunks(doc.id, &[chunk(doc.id, 0)]).unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
    }

    #[test]
    fn reset_clears_chunks_and_reason() {
        let (sm, store) = machine();
        let doc = insert_doc(&store);
        sm.begin_processing(doc.id, false).unwrap();
        sm.complete_with_chunks(doc.id, &[chunk(doc.id, 0)]).unwrap();

        let d = sm.reset_for_reprocess(doc.id).unwrap();
        assert_eq!(d.status, DocumentStatus::Pending);
        assert_eq!(d.chunk_count, 0);
        assert!(d.fail_reason.is_none());
        assert!(store.get_chunks(doc.id).unwrap().is_empty());
    }

    #[test]
    fn restore_only_applies_to_remote_removal() {
        let (sm, store) = machine();
        let doc = insert_doc(&store);
        sm.begin_processing(doc.id, false).unwrap();
        sm.complete_with_chunks(doc.id, &[chunk(doc.id, 0)]).unwrap();
        sm.mark_failed(doc.id, "REMOVED_FROM_REMOTE".into()).unwrap();

        let d = sm.restore_after_remote_return(doc.id).unwrap();
        assert_eq!(d.status, DocumentStatus::Completed);

        // A document failed for any other reason is left alone.
        let other = insert_doc(&store);
        sm.begin_processing(other.id, false).unwrap();
        sm.mark_failed(other.id, "CORRUPT_FILE".into()).unwrap();
        let d = sm.restore_after_remote_return(other.id).unwrap();
        assert_eq!(d.status, DocumentStatus::Failed);
    }

    #[test]
    fn duplicate_pickup_is_a_noop() {
        let (sm, store) = machine();
        let doc = insert_doc(&store);
        sm.begin_processing(doc.id, false).unwrap();
        let d = sm.begin_processing(doc.id, false).unwrap();
        assert_eq!(d.status, DocumentStatus::Processing);
        assert_eq!(d.retry_count, 0);
    }
}
