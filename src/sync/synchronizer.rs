//! Remote folder synchronizer
//!
//! Full sync walks the folder listing and establishes a fresh change
//! cursor; incremental sync drains the change stream from the stored
//! cursor. Per-file errors accumulate in the report and never abort the
//! run; the cursor advances only when the whole run succeeds.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind};
use crate::ingestion::{DocumentIntake, FormatRouter, IntakeRequest, RemoteAttachment};
use crate::processing::StateMachine;
use crate::providers::RemoteSource;
use crate::storage::MetadataStore;
use crate::types::document::{content_hash, Document};
use crate::types::job::fail_codes;
use crate::types::profile::ProfileConfig;
use crate::types::remote::{RemoteFile, RemoteFolderBinding, SyncFileError, SyncReport};

const PROGRESS_EVERY: usize = 10;

pub struct FolderSynchronizer {
    store: Arc<MetadataStore>,
    state_machine: Arc<StateMachine>,
    intake: Arc<DocumentIntake>,
    remote: Arc<dyn RemoteSource>,
    events: EventBus,
    /// Set on shutdown: the current page finishes, the token stays put.
    cancelled: Arc<AtomicBool>,
}

impl FolderSynchronizer {
    pub fn new(
        store: Arc<MetadataStore>,
        state_machine: Arc<StateMachine>,
        intake: Arc<DocumentIntake>,
        remote: Arc<dyn RemoteSource>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            state_machine,
            intake,
            remote,
            events,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used by the shutdown path to stop in-flight syncs.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Run one sync for the binding. Concurrent runs for the same binding
    /// are rejected immediately.
    pub async fn sync(&self, binding_id: Uuid) -> Result<SyncReport> {
        let binding = self
            .store
            .get_binding(binding_id)?
            .ok_or_else(|| Error::BindingNotFound(binding_id.to_string()))?;

        if !binding.enabled {
            tracing::debug!(binding_id = %binding_id, "binding disabled; sync skipped");
            return Ok(SyncReport::default());
        }

        if !self.store.try_begin_sync(binding_id)? {
            return Err(Error::SyncInProgress(binding_id));
        }

        self.events.emit(EventKind::SyncStart { binding_id });

        let outcome = self.run(&binding).await;

        match outcome {
            Ok((report, new_token, was_cancelled)) => {
                if was_cancelled {
                    // Cancellation is not an error, but the cursor must not
                    // move so the next run resumes the same window.
                    self.store.reset_sync_status(binding_id)?;
                } else {
                    self.store.finish_sync(binding_id, new_token, None)?;
                }
                self.events.emit(EventKind::SyncComplete {
                    binding_id,
                    added: report.added,
                    updated: report.updated,
                    removed: report.removed,
                });
                tracing::info!(
                    binding_id = %binding_id,
                    added = report.added,
                    updated = report.updated,
                    removed = report.removed,
                    errors = report.errors.len(),
                    "sync finished"
                );
                Ok(report)
            }
            Err(e) => {
                let message = e.to_string();
                self.store.finish_sync(binding_id, None, Some(message.clone()))?;
                self.events.emit(EventKind::SyncError {
                    binding_id,
                    error: message,
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        binding: &RemoteFolderBinding,
    ) -> Result<(SyncReport, Option<String>, bool)> {
        match &binding.page_token {
            None => self.full_sync(binding).await,
            Some(token) => self.incremental_sync(binding, token).await,
        }
    }

    /// Full walk of the folder; a fresh change cursor is taken at the end
    /// so the next run can go incremental.
    async fn full_sync(
        &self,
        binding: &RemoteFolderBinding,
    ) -> Result<(SyncReport, Option<String>, bool)> {
        let mut report = SyncReport::default();
        let files = self
            .remote
            .list_folder(&binding.remote_folder_id, binding.recursive)
            .await?;

        let mut seen: HashSet<String> = HashSet::with_capacity(files.len());
        let mut processed = 0usize;

        for file in files {
            if self.cancelled.load(Ordering::Relaxed) {
                return Ok((report, None, true));
            }
            seen.insert(file.id.clone());
            self.handle_file(binding, &file, &mut report).await;
            processed += 1;
            if processed % PROGRESS_EVERY == 0 {
                self.events.emit(EventKind::SyncProgress {
                    binding_id: binding.id,
                    processed,
                });
            }
        }

        // Anything previously tracked under this folder but absent from the
        // listing was removed on the remote side.
        for doc in self
            .store
            .get_documents_by_remote_folder(&binding.remote_folder_id)?
        {
            let tracked = doc
                .remote_file_id
                .as_ref()
                .map(|id| seen.contains(id))
                .unwrap_or(true);
            if !tracked {
                self.mark_removed(&doc, &mut report);
            }
        }

        let token = self.remote.start_page_token().await?;
        Ok((report, Some(token), false))
    }

    /// Drain the change stream from the stored cursor.
    async fn incremental_sync(
        &self,
        binding: &RemoteFolderBinding,
        start_token: &str,
    ) -> Result<(SyncReport, Option<String>, bool)> {
        let mut report = SyncReport::default();
        let mut token = start_token.to_string();
        let mut new_start_token: Option<String> = None;
        let mut processed = 0usize;

        loop {
            let page = self.remote.changes(&token).await?;

            for change in &page.changes {
                if change.removed {
                    if let Some(doc) =
                        self.store.get_document_by_remote_id(&change.remote_file_id)?
                    {
                        self.mark_removed(&doc, &mut report);
                    }
                } else if let Some(file) = &change.file {
                    self.handle_file(binding, file, &mut report).await;
                }
                processed += 1;
                if processed % PROGRESS_EVERY == 0 {
                    self.events.emit(EventKind::SyncProgress {
                        binding_id: binding.id,
                        processed,
                    });
                }
            }

            if let Some(t) = page.new_start_page_token {
                new_start_token = Some(t);
            }
            // Cancellation takes effect between pages.
            if self.cancelled.load(Ordering::Relaxed) {
                return Ok((report, None, true));
            }
            match page.next_page_token {
                Some(next) => token = next,
                None => break,
            }
        }

        Ok((report, new_start_token, false))
    }

    /// Per-file handling shared by both modes. Errors land in the report.
    async fn handle_file(
        &self,
        binding: &RemoteFolderBinding,
        file: &RemoteFile,
        report: &mut SyncReport,
    ) {
        match self.apply_file(binding, file).await {
            Ok(FileOutcome::Added) => report.added += 1,
            Ok(FileOutcome::Updated) => report.updated += 1,
            Ok(FileOutcome::Unchanged) => {}
            Err(e) => {
                tracing::warn!(remote_file_id = %file.id, "sync file failed: {}", e);
                report.errors.push(SyncFileError {
                    remote_file_id: file.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn apply_file(
        &self,
        binding: &RemoteFolderBinding,
        file: &RemoteFile,
    ) -> Result<FileOutcome> {
        // 1. Known remote file?
        if let Some(doc) = self.store.get_document_by_remote_id(&file.id)? {
            let unchanged = file
                .md5
                .as_ref()
                .map(|m| *m == doc.md5_hash)
                .unwrap_or(false);

            if unchanged {
                self.store.touch_remote_metadata(doc.id, file.modified_time)?;
                // A file that disappeared and came back unchanged recovers
                // its COMPLETED status; any other status is left alone.
                if doc.fail_reason.as_deref() == Some(fail_codes::REMOVED_FROM_REMOTE) {
                    self.state_machine.restore_after_remote_return(doc.id)?;
                }
                return Ok(FileOutcome::Unchanged);
            }

            return self.reprocess(binding, &doc, file).await;
        }

        // 2. Unknown remote id: download and dedup by content.
        let bytes = self.remote.download(&file.id).await?;
        let hash = content_hash(&bytes);

        if let Some(existing) = self.store.get_document_by_hash(&hash)? {
            // Same bytes already ingested (e.g. a manual upload): attach the
            // existing document to the remote file instead of duplicating.
            // The downloaded copy is dropped on the floor.
            self.store.link_document_to_remote(
                existing.id,
                &file.id,
                &file.folder_id,
                file.modified_time,
            )?;
            tracing::info!(
                document_id = %existing.id,
                remote_file_id = %file.id,
                "linked existing document to remote file"
            );
            return Ok(FileOutcome::Unchanged);
        }

        // 3. Genuinely new content.
        let (profile_id, profile) = self.resolve_profile(binding)?;
        self.intake
            .admit(IntakeRequest {
                filename: file.name.clone(),
                mime_type: file.mime_type.clone(),
                bytes,
                profile_id,
                profile,
                remote: Some(RemoteAttachment {
                    file_id: file.id.clone(),
                    folder_id: file.folder_id.clone(),
                    modified_time: file.modified_time,
                }),
            })
            .await?;
        Ok(FileOutcome::Added)
    }

    /// Remote content changed: download, swap the stored bytes, reset the
    /// document to PENDING and run it through the pipeline again.
    async fn reprocess(
        &self,
        binding: &RemoteFolderBinding,
        doc: &Document,
        file: &RemoteFile,
    ) -> Result<FileOutcome> {
        let bytes = self.remote.download(&file.id).await?;
        let hash = content_hash(&bytes);

        if hash == doc.md5_hash {
            // The remote reported a stale md5; content is actually the same.
            self.store.touch_remote_metadata(doc.id, file.modified_time)?;
            return Ok(FileOutcome::Unchanged);
        }

        let (_, profile) = self.resolve_profile_for_doc(binding, doc)?;

        let decision = FormatRouter::route(
            &file.name,
            &file.mime_type,
            bytes.len() as u64,
            profile.max_file_size_bytes(),
        )?;

        let path = self.intake.store_file(&hash, &bytes)?;
        self.store
            .update_document_content(doc.id, &hash, bytes.len() as u64, &path)?;
        self.store.touch_remote_metadata(doc.id, file.modified_time)?;
        self.state_machine.reset_for_reprocess(doc.id)?;

        let refreshed = self
            .store
            .get_document(doc.id)?
            .ok_or_else(|| Error::DocumentNotFound(doc.id.to_string()))?;
        self.intake
            .start_processing(&refreshed, &bytes, &decision, profile)?;
        Ok(FileOutcome::Updated)
    }

    fn mark_removed(&self, doc: &Document, report: &mut SyncReport) {
        match self
            .state_machine
            .mark_failed(doc.id, fail_codes::REMOVED_FROM_REMOTE.to_string())
        {
            Ok(_) => report.removed += 1,
            Err(e) => report.errors.push(SyncFileError {
                remote_file_id: doc.remote_file_id.clone().unwrap_or_default(),
                error: e.to_string(),
            }),
        }
    }

    /// Binding profile, else the default.
    fn resolve_profile(&self, binding: &RemoteFolderBinding) -> Result<(Option<Uuid>, ProfileConfig)> {
        if let Some(profile_id) = binding.profile_id {
            if let Some(profile) = self.store.get_profile(profile_id)? {
                return Ok((Some(profile_id), profile.config));
            }
        }
        let default = self.store.get_default_profile()?;
        Ok((Some(default.id), default.config))
    }

    /// Document profile first, then binding, then default.
    fn resolve_profile_for_doc(
        &self,
        binding: &RemoteFolderBinding,
        doc: &Document,
    ) -> Result<(Option<Uuid>, ProfileConfig)> {
        if let Some(profile_id) = doc.profile_id {
            if let Some(profile) = self.store.get_profile(profile_id)? {
                return Ok((Some(profile_id), profile.config));
            }
        }
        self.resolve_profile(binding)
    }
}

enum FileOutcome {
    Added,
    Updated,
    Unchanged,
}
