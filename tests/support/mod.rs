//! Shared test harness: in-memory store, deterministic embeddings, scripted
//! remote source and a recording converter.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use ragpipe::config::AppConfig;
use ragpipe::error::{Error, Result};
use ragpipe::providers::{ConverterClient, RemoteSource, SqliteVectorIndex, StaticEmbedder};
use ragpipe::server::state::AppState;
use ragpipe::storage::MetadataStore;
use ragpipe::types::document::DocumentStatus;
use ragpipe::types::job::ProcessingJob;
use ragpipe::types::remote::{ChangePage, RemoteChange, RemoteFile};

pub const EMBED_DIM: usize = 64;

/// Converter stub that records every dispatched job.
#[derive(Default)]
pub struct RecordingConverter {
    pub dispatched: Mutex<Vec<ProcessingJob>>,
    pub fail_dispatch: Mutex<bool>,
}

#[async_trait]
impl ConverterClient for RecordingConverter {
    async fn dispatch(&self, job: &ProcessingJob) -> Result<()> {
        if *self.fail_dispatch.lock() {
            return Err(Error::Converter("converter offline".into()));
        }
        self.dispatched.lock().push(job.clone());
        Ok(())
    }
}

/// Scripted remote store.
#[derive(Default)]
pub struct FakeRemote {
    pub files: Mutex<Vec<RemoteFile>>,
    pub contents: Mutex<HashMap<String, Vec<u8>>>,
    /// Changes handed out by the next incremental run.
    pub pending_changes: Mutex<Vec<RemoteChange>>,
    token_counter: AtomicU32,
}

impl FakeRemote {
    pub fn add_file(&self, id: &str, name: &str, mime: &str, folder: &str, bytes: &[u8]) {
        let md5 = format!("{:x}", md5::compute(bytes));
        self.files.lock().push(RemoteFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            md5: Some(md5),
            size: bytes.len() as u64,
            modified_time: Some(chrono::Utc::now()),
            folder_id: folder.to_string(),
        });
        self.contents.lock().insert(id.to_string(), bytes.to_vec());
    }

    pub fn push_change(&self, remote_file_id: &str, removed: bool) {
        let file = self
            .files
            .lock()
            .iter()
            .find(|f| f.id == remote_file_id)
            .cloned();
        self.pending_changes.lock().push(RemoteChange {
            remote_file_id: remote_file_id.to_string(),
            removed,
            file: if removed { None } else { file },
        });
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn start_page_token(&self) -> Result<String> {
        Ok(format!(
            "token-{}",
            self.token_counter.fetch_add(1, Ordering::SeqCst)
        ))
    }

    async fn list_folder(&self, folder_id: &str, _recursive: bool) -> Result<Vec<RemoteFile>> {
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|f| f.folder_id == folder_id)
            .cloned()
            .collect())
    }

    async fn changes(&self, _page_token: &str) -> Result<ChangePage> {
        let changes = std::mem::take(&mut *self.pending_changes.lock());
        Ok(ChangePage {
            changes,
            next_page_token: None,
            new_start_page_token: Some(format!(
                "token-{}",
                self.token_counter.fetch_add(1, Ordering::SeqCst)
            )),
        })
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        self.contents
            .lock()
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::RemoteSource(format!("no such file: {}", file_id)))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MetadataStore>,
    pub remote: Arc<FakeRemote>,
    pub converter: Arc<RecordingConverter>,
    _upload_dir: tempfile::TempDir,
}

/// Wire an application around an in-memory store, deterministic embeddings
/// and scripted collaborators. Background workers are not started; tests
/// drive the queue by hand.
pub fn test_app() -> TestApp {
    let upload_dir = tempfile::tempdir().expect("tempdir");

    let mut config = AppConfig::default();
    config.embedding.dimension = EMBED_DIM;
    config.storage.upload_dir = upload_dir.path().to_path_buf();

    let store = Arc::new(MetadataStore::in_memory().expect("store"));
    let embedder = Arc::new(StaticEmbedder::new(EMBED_DIM, true));
    let vector_index = Arc::new(SqliteVectorIndex::new(store.clone()));
    let converter = Arc::new(RecordingConverter::default());
    let remote = Arc::new(FakeRemote::default());

    let state = AppState::assemble(
        config,
        store.clone(),
        embedder,
        vector_index,
        converter.clone(),
        remote.clone(),
    )
    .expect("state");

    TestApp {
        state,
        store,
        remote,
        converter,
        _upload_dir: upload_dir,
    }
}

/// Poll until the document reaches `status` or the timeout passes.
pub async fn wait_for_status(
    store: &MetadataStore,
    id: Uuid,
    status: DocumentStatus,
    timeout: Duration,
) -> ragpipe::types::document::Document {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let doc = store
            .get_document(id)
            .expect("store read")
            .expect("document exists");
        if doc.status == status {
            return doc;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "document {} stuck in {:?} (wanted {:?}, fail_reason {:?})",
            id,
            doc.status,
            status,
            doc.fail_reason
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
