//! Folder synchronizer: full sync, incremental delta, link dedup, removal

mod support;

use std::time::Duration;

use ragpipe::error::Error;
use ragpipe::ingestion::IntakeRequest;
use ragpipe::types::document::{ConnectionState, DocumentStatus, SourceType};
use ragpipe::types::remote::{RemoteFolderBinding, SyncStatus};

use support::{test_app, wait_for_status};

const FOLDER: &str = "folder-1";

const DOC_A: &str = "# Alpha\nFirst synced document with enough body text to clear the \
quality gate and produce a chunk for retrieval.\n";
const DOC_B: &str = "# Beta\nSecond synced document, also comfortably above the minimum \
length threshold for admission.\n";

fn binding(app: &support::TestApp) -> RemoteFolderBinding {
    let b = RemoteFolderBinding::new(FOLDER.into(), true, None);
    app.store.insert_binding(&b).expect("binding");
    b
}

#[tokio::test]
async fn full_sync_ingests_folder_and_establishes_cursor() {
    let app = test_app();
    let b = binding(&app);
    app.remote.add_file("rf-1", "alpha.md", "text/markdown", FOLDER, DOC_A.as_bytes());
    app.remote.add_file("rf-2", "beta.md", "text/markdown", FOLDER, DOC_B.as_bytes());

    let report = app.state.synchronizer().sync(b.id).await.expect("sync");
    assert_eq!(report.added, 2);
    assert_eq!(report.updated, 0);
    assert_eq!(report.removed, 0);
    assert!(report.errors.is_empty());

    let stored = app.store.get_binding(b.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Idle);
    assert!(stored.page_token.is_some(), "full sync must leave a cursor");
    assert!(stored.last_synced_at.is_some());

    // Synced documents are remote-linked and flow through the fast lane.
    let doc = app.store.get_document_by_remote_id("rf-1").unwrap().unwrap();
    assert_eq!(doc.source_type, SourceType::Remote);
    assert_eq!(doc.connection_state, ConnectionState::Linked);
    wait_for_status(&app.store, doc.id, DocumentStatus::Completed, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn resync_with_no_changes_reports_zeroes() {
    let app = test_app();
    let b = binding(&app);
    app.remote.add_file("rf-1", "alpha.md", "text/markdown", FOLDER, DOC_A.as_bytes());

    app.state.synchronizer().sync(b.id).await.expect("full sync");
    // Incremental run over an empty change stream.
    let report = app.state.synchronizer().sync(b.id).await.expect("incremental");
    assert_eq!((report.added, report.updated, report.removed), (0, 0, 0));
}

#[tokio::test]
async fn link_dedup_attaches_existing_document() {
    let app = test_app();
    let b = binding(&app);

    // Manual upload first: a STANDALONE document holds these bytes.
    let (profile_id, profile) = app.state.resolve_upload_profile(None).expect("profile");
    let (manual, _) = app
        .state
        .intake()
        .admit(IntakeRequest {
            filename: "manual.md".into(),
            mime_type: "text/markdown".into(),
            bytes: DOC_A.as_bytes().to_vec(),
            profile_id,
            profile,
            remote: None,
        })
        .await
        .expect("manual upload");
    wait_for_status(&app.store, manual.id, DocumentStatus::Completed, Duration::from_secs(2)).await;

    // The same bytes appear remotely under a fresh remote id.
    app.remote.add_file("rf-9", "alpha.md", "text/markdown", FOLDER, DOC_A.as_bytes());
    let report = app.state.synchronizer().sync(b.id).await.expect("sync");

    // No new document, no reprocessing; the existing one is linked.
    assert_eq!((report.added, report.updated), (0, 0));
    let linked = app.store.get_document(manual.id).unwrap().unwrap();
    assert_eq!(linked.connection_state, ConnectionState::Linked);
    assert_eq!(linked.source_type, SourceType::Remote);
    assert_eq!(linked.remote_file_id.as_deref(), Some("rf-9"));
    assert_eq!(linked.status, DocumentStatus::Completed);
    assert_eq!(linked.chunk_count, 1, "chunks survive the linking untouched");

    let (_, total, _) = app
        .store
        .list_documents(&ragpipe::storage::DocumentListQuery {
            limit: 50,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(total, 1, "linking must not duplicate the document");
}

#[tokio::test]
async fn removed_file_fails_document_and_return_restores_it() {
    let app = test_app();
    let b = binding(&app);
    app.remote.add_file("rf-1", "alpha.md", "text/markdown", FOLDER, DOC_A.as_bytes());
    app.state.synchronizer().sync(b.id).await.expect("full sync");

    let doc = app.store.get_document_by_remote_id("rf-1").unwrap().unwrap();
    wait_for_status(&app.store, doc.id, DocumentStatus::Completed, Duration::from_secs(2)).await;

    // Removal arrives in the change stream.
    app.remote.push_change("rf-1", true);
    let report = app.state.synchronizer().sync(b.id).await.expect("incremental");
    assert_eq!(report.removed, 1);
    let failed = app.store.get_document(doc.id).unwrap().unwrap();
    assert_eq!(failed.status, DocumentStatus::Failed);
    assert_eq!(failed.fail_reason.as_deref(), Some("REMOVED_FROM_REMOTE"));

    // The file comes back unchanged: status is restored, nothing reprocessed.
    app.remote.push_change("rf-1", false);
    let report = app.state.synchronizer().sync(b.id).await.expect("incremental");
    assert_eq!((report.added, report.updated, report.removed), (0, 0, 0));
    let restored = app.store.get_document(doc.id).unwrap().unwrap();
    assert_eq!(restored.status, DocumentStatus::Completed);
    assert!(restored.fail_reason.is_none());
}

#[tokio::test]
async fn changed_remote_content_triggers_reprocess() {
    let app = test_app();
    let b = binding(&app);
    app.remote.add_file("rf-1", "alpha.md", "text/markdown", FOLDER, DOC_A.as_bytes());
    app.state.synchronizer().sync(b.id).await.expect("full sync");

    let doc = app.store.get_document_by_remote_id("rf-1").unwrap().unwrap();
    wait_for_status(&app.store, doc.id, DocumentStatus::Completed, Duration::from_secs(2)).await;
    let old_hash = app.store.get_document(doc.id).unwrap().unwrap().md5_hash;

    // New bytes under the same remote id.
    let updated_body = format!("{}\n## Update\nFresh material appended after the remote edit.\n", DOC_A);
    {
        let mut files = app.remote.files.lock();
        let file = files.iter_mut().find(|f| f.id == "rf-1").unwrap();
        file.md5 = Some(format!("{:x}", md5::compute(updated_body.as_bytes())));
        file.size = updated_body.len() as u64;
    }
    app.remote
        .contents
        .lock()
        .insert("rf-1".into(), updated_body.clone().into_bytes());
    app.remote.push_change("rf-1", false);

    let report = app.state.synchronizer().sync(b.id).await.expect("incremental");
    assert_eq!(report.updated, 1);

    let done = wait_for_status(&app.store, doc.id, DocumentStatus::Completed, Duration::from_secs(2)).await;
    assert_ne!(done.md5_hash, old_hash, "content identity must follow the remote");
    assert!(done.chunk_count >= 1);
}

#[tokio::test]
async fn per_file_errors_do_not_abort_the_run() {
    let app = test_app();
    let b = binding(&app);
    app.remote.add_file("rf-1", "alpha.md", "text/markdown", FOLDER, DOC_A.as_bytes());
    // A file whose bytes cannot be downloaded.
    app.remote.add_file("rf-2", "beta.md", "text/markdown", FOLDER, DOC_B.as_bytes());
    app.remote.contents.lock().remove("rf-2");

    let report = app.state.synchronizer().sync(b.id).await.expect("sync");
    assert_eq!(report.added, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].remote_file_id, "rf-2");

    // The run still succeeded: status IDLE, cursor advanced.
    let stored = app.store.get_binding(b.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Idle);
    assert!(stored.page_token.is_some());
}

#[tokio::test]
async fn concurrent_sync_is_rejected() {
    let app = test_app();
    let b = binding(&app);

    // Simulate a sync holding the binding.
    assert!(app.store.try_begin_sync(b.id).unwrap());
    let err = app
        .state
        .synchronizer()
        .sync(b.id)
        .await
        .expect_err("second sync must be rejected");
    assert!(matches!(err, Error::SyncInProgress(_)));
}

#[tokio::test]
async fn missing_file_in_full_listing_is_marked_removed() {
    let app = test_app();
    let b = binding(&app);
    app.remote.add_file("rf-1", "alpha.md", "text/markdown", FOLDER, DOC_A.as_bytes());
    app.remote.add_file("rf-2", "beta.md", "text/markdown", FOLDER, DOC_B.as_bytes());
    app.state.synchronizer().sync(b.id).await.expect("full sync");

    let beta = app.store.get_document_by_remote_id("rf-2").unwrap().unwrap();
    wait_for_status(&app.store, beta.id, DocumentStatus::Completed, Duration::from_secs(2)).await;

    // Force another full pass with rf-2 gone from the listing.
    app.remote.files.lock().retain(|f| f.id != "rf-2");
    {
        // Clearing the cursor forces full-sync mode.
        let binding = app.store.get_binding(b.id).unwrap().unwrap();
        assert!(binding.page_token.is_some());
    }
    let mut fresh = RemoteFolderBinding::new(FOLDER.into(), true, None);
    fresh.id = uuid::Uuid::new_v4();
    app.store.insert_binding(&fresh).expect("fresh binding");

    let report = app.state.synchronizer().sync(fresh.id).await.expect("second full sync");
    assert_eq!(report.removed, 1);
    let removed = app.store.get_document(beta.id).unwrap().unwrap();
    assert_eq!(removed.status, DocumentStatus::Failed);
    assert_eq!(removed.fail_reason.as_deref(), Some("REMOVED_FROM_REMOTE"));
}
