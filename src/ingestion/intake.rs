//! Shared document admission path
//!
//! Uploads and the folder synchronizer both admit files through here:
//! route, hash, dedup, store the bytes under their content hash, create the
//! PENDING document and kick off the matching lane.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind};
use crate::processing::{FastLaneProcessor, ProcessingQueue};
use crate::storage::MetadataStore;
use crate::types::document::{content_hash, ConnectionState, Document, Lane, SourceType};
use crate::types::job::ProcessingJob;
use crate::types::profile::ProfileConfig;

use super::router::{FormatRouter, RoutingDecision};

/// Remote provenance attached to sync-admitted documents
#[derive(Debug, Clone)]
pub struct RemoteAttachment {
    pub file_id: String,
    pub folder_id: String,
    pub modified_time: Option<DateTime<Utc>>,
}

/// Parameters of one admission
pub struct IntakeRequest {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub profile_id: Option<Uuid>,
    pub profile: ProfileConfig,
    pub remote: Option<RemoteAttachment>,
}

pub struct DocumentIntake {
    store: Arc<MetadataStore>,
    queue: Arc<ProcessingQueue>,
    fast_lane: Arc<FastLaneProcessor>,
    events: EventBus,
    upload_dir: PathBuf,
}

impl DocumentIntake {
    pub fn new(
        store: Arc<MetadataStore>,
        queue: Arc<ProcessingQueue>,
        fast_lane: Arc<FastLaneProcessor>,
        events: EventBus,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            queue,
            fast_lane,
            events,
            upload_dir,
        }
    }

    /// Admit a file: returns the created PENDING document and its routing.
    /// Fails with `DuplicateFile` when the content hash is already known.
    pub async fn admit(&self, request: IntakeRequest) -> Result<(Document, RoutingDecision)> {
        let decision = FormatRouter::route(
            &request.filename,
            &request.mime_type,
            request.bytes.len() as u64,
            request.profile.max_file_size_bytes(),
        )?;

        let hash = content_hash(&request.bytes);
        if let Some(existing) = self.store.get_document_by_hash(&hash)? {
            return Err(Error::DuplicateFile {
                existing_id: existing.id,
            });
        }

        let file_path = self.store_file(&hash, &request.bytes)?;

        let mut doc = Document::new(
            request.filename,
            request.mime_type,
            request.bytes.len() as u64,
            decision.format,
            hash,
            file_path,
            request.profile_id,
        );
        if let Some(remote) = &request.remote {
            doc.source_type = SourceType::Remote;
            doc.connection_state = ConnectionState::Linked;
            doc.remote_file_id = Some(remote.file_id.clone());
            doc.remote_folder_id = Some(remote.folder_id.clone());
            doc.remote_modified_time = remote.modified_time;
        }

        self.store.insert_document(&doc)?;
        self.events.emit(EventKind::DocumentCreated {
            document_id: doc.id,
            filename: doc.filename.clone(),
        });

        self.start_processing(&doc, &request.bytes, &decision, request.profile)?;
        Ok((doc, decision))
    }

    /// Kick off the lane for an already-persisted document. Used by admit
    /// and by the synchronizer's reprocess path.
    pub fn start_processing(
        &self,
        doc: &Document,
        bytes: &[u8],
        decision: &RoutingDecision,
        profile: ProfileConfig,
    ) -> Result<()> {
        match decision.lane {
            Lane::Fast => {
                let processor = self.fast_lane.clone();
                let document_id = doc.id;
                let format = decision.format;
                let content = String::from_utf8_lossy(bytes).into_owned();
                tokio::spawn(async move {
                    processor
                        .process(document_id, &content, format, &profile)
                        .await;
                });
            }
            Lane::Heavy => {
                let job = ProcessingJob::new(
                    doc.id,
                    doc.file_path.to_string_lossy().into_owned(),
                    decision.format,
                    profile,
                    0, // max_attempts comes from queue config on enqueue
                );
                self.queue.enqueue(job)?;
            }
        }
        Ok(())
    }

    /// Write the bytes under their content hash; the original filename
    /// survives only as document metadata. Re-writing the same content is a
    /// no-op by construction.
    pub fn store_file(&self, hash: &str, bytes: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.upload_dir)?;
        let path = self.upload_dir.join(hash);
        if !path.exists() {
            std::fs::write(&path, bytes)?;
        }
        Ok(path)
    }
}
