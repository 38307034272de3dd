//! End-to-end fast-lane behavior through the intake path

mod support;

use std::time::Duration;

use ragpipe::error::Error;
use ragpipe::ingestion::IntakeRequest;
use ragpipe::types::document::{DocumentStatus, FileFormat, Lane};
use ragpipe::types::query::{SearchMode, SearchRequest};

use support::{test_app, wait_for_status};

const NOTES_MD: &str = "# Intro\n\
This note introduces the project and explains what the reader will find.\n\
It stays short on purpose so a single chunk covers the whole file.\n\n\
## Detail\n\
The detail section expands on the introduction with concrete specifics,\n\
including configuration hints and a couple of worked examples to follow.\n";

fn request(app: &support::TestApp, filename: &str, mime: &str, bytes: &[u8]) -> IntakeRequest {
    let (profile_id, profile) = app.state.resolve_upload_profile(None).expect("profile");
    IntakeRequest {
        filename: filename.to_string(),
        mime_type: mime.to_string(),
        bytes: bytes.to_vec(),
        profile_id,
        profile,
        remote: None,
    }
}

#[tokio::test]
async fn markdown_upload_completes_with_one_chunk() {
    let app = test_app();

    let (doc, decision) = app
        .state
        .intake()
        .admit(request(&app, "notes.md", "text/markdown", NOTES_MD.as_bytes()))
        .await
        .expect("admit");
    assert_eq!(decision.lane, Lane::Fast);
    assert_eq!(doc.status, DocumentStatus::Pending);

    let done = wait_for_status(&app.store, doc.id, DocumentStatus::Completed, Duration::from_secs(2)).await;
    assert_eq!(done.chunk_count, 1);
    assert!(done.fail_reason.is_none());

    let chunks = app.store.get_chunks(doc.id).expect("chunks");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].heading.as_deref(), Some("Intro"));
    assert_eq!(chunks[0].embedding.len(), support::EMBED_DIM);

    // The chunk is immediately searchable, heading metadata included.
    let response = app
        .state
        .search()
        .search(&SearchRequest {
            query_text: "intro".into(),
            top_k: 1,
            mode: SearchMode::Hybrid,
            alpha: None,
            filter: None,
        })
        .await
        .expect("search");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].document_id, doc.id);
    assert_eq!(response.results[0].metadata.heading.as_deref(), Some("Intro"));
}

#[tokio::test]
async fn invalid_json_fails_terminally() {
    let app = test_app();
    let (doc, _) = app
        .state
        .intake()
        .admit(request(&app, "data.json", "application/json", b"{not valid json"))
        .await
        .expect("admit");

    let failed = wait_for_status(&app.store, doc.id, DocumentStatus::Failed, Duration::from_secs(2)).await;
    assert_eq!(failed.fail_reason.as_deref(), Some("INVALID_JSON"));
    assert_eq!(failed.chunk_count, 0);
}

#[tokio::test]
async fn valid_json_is_pretty_printed_and_chunked() {
    let app = test_app();
    let body = serde_json::json!({
        "title": "service catalog",
        "entries": (0..30).map(|i| format!("service-{i} handles a distinct concern")).collect::<Vec<_>>(),
    });
    let (doc, _) = app
        .state
        .intake()
        .admit(request(
            &app,
            "catalog.json",
            "application/json",
            serde_json::to_vec(&body).unwrap().as_slice(),
        ))
        .await
        .expect("admit");

    let done = wait_for_status(&app.store, doc.id, DocumentStatus::Completed, Duration::from_secs(2)).await;
    assert!(done.chunk_count >= 1);
}

#[tokio::test]
async fn short_text_is_rejected_by_the_gate() {
    let app = test_app();
    let (doc, _) = app
        .state
        .intake()
        .admit(request(&app, "tiny.txt", "text/plain", b"too small"))
        .await
        .expect("admit");

    let failed = wait_for_status(&app.store, doc.id, DocumentStatus::Failed, Duration::from_secs(2)).await;
    assert_eq!(failed.fail_reason.as_deref(), Some("TEXT_TOO_SHORT"));
}

#[tokio::test]
async fn duplicate_bytes_are_rejected_with_existing_id() {
    let app = test_app();
    let (doc, _) = app
        .state
        .intake()
        .admit(request(&app, "notes.md", "text/markdown", NOTES_MD.as_bytes()))
        .await
        .expect("first admit");

    // Same bytes under a different name: still a duplicate.
    let err = app
        .state
        .intake()
        .admit(request(&app, "renamed.md", "text/markdown", NOTES_MD.as_bytes()))
        .await
        .expect_err("second admit must fail");
    match err {
        Error::DuplicateFile { existing_id } => assert_eq!(existing_id, doc.id),
        other => panic!("expected DuplicateFile, got {}", other),
    }

    // Exactly one document holds that hash.
    let (docs, total, _) = app
        .store
        .list_documents(&ragpipe::storage::DocumentListQuery {
            limit: 50,
            ..Default::default()
        })
        .expect("list");
    assert_eq!(total, 1);
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn unsupported_format_is_refused_up_front() {
    let app = test_app();
    let err = app
        .state
        .intake()
        .admit(request(&app, "firmware.bin", "application/octet-stream", &[0u8; 128]))
        .await
        .expect_err("binary must be refused");
    assert!(matches!(err, Error::UnsupportedFormat(_)));
}

#[tokio::test]
async fn heavy_formats_enqueue_instead_of_running_inline() {
    let app = test_app();
    let (doc, decision) = app
        .state
        .intake()
        .admit(request(&app, "report.pdf", "application/pdf", b"%PDF-1.4 stub"))
        .await
        .expect("admit");
    assert_eq!(decision.lane, Lane::Heavy);
    assert_eq!(decision.format, FileFormat::Pdf);

    // No inline processing: the document stays PENDING with a waiting job.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let doc = app.store.get_document(doc.id).unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Pending);
    assert_eq!(app.state.queue().counts().waiting, 1);
}
