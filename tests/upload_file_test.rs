mod common;

use std::collections::HashSet;
use std::sync::Arc;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use uplink::config::UploadConfig;
use uplink::uploaders::UploadFileOptions;
use uplink::{JobQueue, SourceFile, Upload, UploadEvent, UploadFile, UploadStatus};
use common::*;

fn file_url(name: &str) -> String {
    format!("{}/{}", FILES_ROOT, name)
}

fn options(max_chunk_size: u64) -> UploadFileOptions {
    UploadFileOptions {
        config: UploadConfig { max_chunk_size, ..Default::default() },
        chunk_root: Some(UPLOADS_ROOT.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_chunked_upload_protocol() {
    let transport = MockTransport::new();
    let file = SourceFile::from_bytes("a.bin", vec![7u8; 2048]).with_last_modified(1_620_000_000_000);
    let mut headers = HeaderMap::new();
    headers.insert("x-request-token", HeaderValue::from_static("abc"));
    let upload = UploadFile::new(
        file_url("a.bin"),
        file,
        transport.clone(),
        UploadFileOptions { headers, ..options(1024) },
    );
    let events = record_events(&upload);

    assert!(upload.is_chunked());
    assert_eq!(upload.number_of_chunks(), 2);

    upload.start(&JobQueue::new(5)).await.unwrap();

    let requests = transport.requests();
    let methods: Vec<_> = requests.iter().map(|r| r.method.as_str()).collect();
    assert_eq!(methods, vec!["MKCOL", "PUT", "PUT", "MOVE"]);

    let workspace = &requests[0].url;
    assert!(workspace.starts_with(&format!("{}/web-file-upload-", UPLOADS_ROOT)));
    assert_eq!(requests[0].header("destination"), Some(file_url("a.bin")));
    assert_eq!(requests[0].header("x-request-token").as_deref(), Some("abc"));

    let chunk_urls: HashSet<_> = requests[1..3].iter().map(|r| r.url.clone()).collect();
    assert!(chunk_urls.contains(&format!("{}/1", workspace)));
    assert!(chunk_urls.contains(&format!("{}/2", workspace)));
    for chunk in &requests[1..3] {
        assert_eq!(chunk.body_len, 1024);
        assert_eq!(chunk.header("oc-total-length").as_deref(), Some("2048"));
        assert_eq!(chunk.header("destination"), Some(file_url("a.bin")));
        assert_eq!(chunk.header("content-type").as_deref(), Some("application/octet-stream"));
        assert_eq!(chunk.header("x-oc-mtime").as_deref(), Some("1620000000"));
        assert_eq!(chunk.header("x-request-token").as_deref(), Some("abc"));
    }

    let assemble = &requests[3];
    assert_eq!(assemble.url, format!("{}/.file", workspace));
    assert_eq!(assemble.header("destination"), Some(file_url("a.bin")));
    assert_eq!(assemble.header("oc-total-length").as_deref(), Some("2048"));
    assert_eq!(assemble.header("x-oc-mtime").as_deref(), Some("1620000000"));
    assert_eq!(assemble.header("x-request-token").as_deref(), Some("abc"));

    assert_eq!(upload.status(), UploadStatus::Finished);
    assert_eq!(upload.uploaded_bytes(), 2048);

    let events = events.lock();
    assert_eq!(
        status_changes(&events),
        vec![
            UploadStatus::Scheduled,
            UploadStatus::Uploading,
            UploadStatus::Assembling,
            UploadStatus::Finished,
        ]
    );
    assert_eq!(finished_count(&events), 1);
}

#[tokio::test]
async fn test_small_file_is_sent_whole() {
    let transport = MockTransport::new();
    let file = SourceFile::from_bytes("notes.txt", vec![1u8; 1000]).with_last_modified(1_620_000_000_000);
    let upload = UploadFile::new(file_url("notes.txt"), file, transport.clone(), options(1024));
    let events = record_events(&upload);

    assert!(!upload.is_chunked());
    upload.start(&JobQueue::new(5)).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].url, file_url("notes.txt"));
    assert_eq!(requests[0].body_len, 1000);
    assert_eq!(requests[0].header("content-type").as_deref(), Some("text/plain"));
    assert_eq!(requests[0].header("x-oc-mtime").as_deref(), Some("1620000000"));

    let events = events.lock();
    assert_eq!(
        status_changes(&events),
        vec![UploadStatus::Scheduled, UploadStatus::Uploading, UploadStatus::Finished]
    );
    assert_eq!(finished_count(&events), 1);
    assert_eq!(upload.uploaded_bytes(), 1000);
}

#[tokio::test]
async fn test_whole_upload_progress_holds_back_until_acknowledged() {
    let transport = MockTransport::new();
    let upload = Arc::new(UploadFile::new(
        file_url("a.txt"),
        SourceFile::from_bytes("a.txt", vec![0u8; 1000]),
        transport.clone(),
        options(0),
    ));
    let events = record_events(upload.as_ref());

    upload.start(&JobQueue::new(1)).await.unwrap();

    let progress: Vec<u64> = events
        .lock()
        .iter()
        .filter_map(|event| match event {
            UploadEvent::Progress { uploaded_bytes, .. } => Some(*uploaded_bytes),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![900, 1000]);
}

#[tokio::test]
async fn test_non_positive_mtime_is_not_sent() {
    let transport = MockTransport::new();
    let file = SourceFile::from_bytes("old.txt", vec![0u8; 10]).with_last_modified(-1000);
    let upload = UploadFile::new(file_url("old.txt"), file, transport.clone(), options(1024));

    upload.start(&JobQueue::new(1)).await.unwrap();
    assert_eq!(transport.requests()[0].header("x-oc-mtime"), None);
}

#[tokio::test]
async fn test_cancel_during_chunks_ends_cancelled() {
    let transport = MockTransport::new();
    transport.block("PUT");

    let upload = Arc::new(UploadFile::new(
        file_url("big.bin"),
        SourceFile::from_bytes("big.bin", vec![0u8; 4096]),
        transport.clone(),
        options(1024),
    ));
    let events = record_events(upload.as_ref());
    let queue = JobQueue::new(2);

    let handle = tokio::spawn({
        let upload = upload.clone();
        let queue = queue.clone();
        async move { upload.start(&queue).await }
    });

    transport.wait_for("PUT", 1).await;
    upload.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(upload.status(), UploadStatus::Cancelled);
    assert_eq!(transport.count("MOVE"), 0);
    assert_eq!(finished_count(&events.lock()), 1);

    queue.on_idle().await;
}

#[tokio::test]
async fn test_chunk_failure_fails_upload_without_assembling() {
    let transport = MockTransport::new();
    transport.respond("PUT", "/3", StatusCode::INSUFFICIENT_STORAGE);

    let upload = UploadFile::new(
        file_url("big.bin"),
        SourceFile::from_bytes("big.bin", vec![0u8; 4096]),
        transport.clone(),
        options(1024),
    );

    let err = upload.start(&JobQueue::new(1)).await.unwrap_err();
    assert!(!err.is_cancelled());
    assert_eq!(err.response().map(|r| r.status), Some(StatusCode::INSUFFICIENT_STORAGE));
    assert_eq!(upload.status(), UploadStatus::Failed);
    assert_eq!(transport.count("MOVE"), 0);

    // 507 is never retried
    let failed_chunk = transport
        .requests_with("PUT")
        .into_iter()
        .filter(|r| r.url.ends_with("/3"))
        .count();
    assert_eq!(failed_chunk, 1);
}

#[tokio::test(start_paused = true)]
async fn test_locked_resource_is_retried() {
    let transport = MockTransport::new();
    transport.respond_once("PUT", "locked.txt", StatusCode::LOCKED);

    let upload = UploadFile::new(
        file_url("locked.txt"),
        SourceFile::from_bytes("locked.txt", vec![0u8; 10]),
        transport.clone(),
        options(1024),
    );

    upload.start(&JobQueue::new(1)).await.unwrap();
    assert_eq!(transport.count("PUT"), 2);
    assert_eq!(upload.status(), UploadStatus::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_exhausts_retries() {
    let transport = MockTransport::new();
    transport.respond("PUT", "broken.txt", StatusCode::INTERNAL_SERVER_ERROR);

    let upload = UploadFile::new(
        file_url("broken.txt"),
        SourceFile::from_bytes("broken.txt", vec![0u8; 10]),
        transport.clone(),
        UploadFileOptions { retries: Some(2), ..options(1024) },
    );

    let err = upload.start(&JobQueue::new(1)).await.unwrap_err();
    assert_eq!(err.response().map(|r| r.status), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(transport.count("PUT"), 3);
    assert_eq!(upload.status(), UploadStatus::Failed);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let transport = MockTransport::new();
    let upload = UploadFile::new(
        file_url("a.txt"),
        SourceFile::from_bytes("a.txt", vec![0u8; 10]),
        transport.clone(),
        options(1024),
    );
    let events = record_events(&upload);

    upload.cancel();
    assert!(upload.start(&JobQueue::new(1)).await.unwrap_err().is_cancelled());
    assert_eq!(upload.status(), UploadStatus::Cancelled);
    assert!(transport.requests().is_empty());
    assert_eq!(finished_count(&events.lock()), 1);
}

#[tokio::test]
async fn test_cancel_after_server_accepted_is_not_success() {
    let transport = MockTransport::new();
    let upload = Arc::new(UploadFile::new(
        file_url("a.txt"),
        SourceFile::from_bytes("a.txt", vec![0u8; 10]),
        transport.clone(),
        options(1024),
    ));
    let events = record_events(upload.as_ref());

    // cancelled from the progress callback, the PUT still answers 201
    let weak = Arc::downgrade(&upload);
    upload.on_event(Arc::new(move |event: &UploadEvent| {
        if let UploadEvent::Progress { .. } = event {
            if let Some(upload) = weak.upgrade() {
                upload.cancel();
            }
        }
    }));

    let err = upload.start(&JobQueue::new(1)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(upload.status(), UploadStatus::Cancelled);
    assert_eq!(transport.count("PUT"), 1);
    assert_eq!(finished_count(&events.lock()), 1);
}
