//! End-to-end orchestrator tests
//!
//! Runs full upload calls against a mock hosting service and a storage
//! backend substituted at the `StorageUploader` seam.

use async_trait::async_trait;
use futures::StreamExt;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tileset_uploadr::progress::MeteredStream;
use tileset_uploadr::{
    StorageCredentials, StorageUploader, UploadError, UploadEvent, UploadOptions, Uploader,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Storage that drains the stream and succeeds
#[derive(Default)]
struct DrainingStorage {
    calls: AtomicUsize,
}

#[async_trait]
impl StorageUploader for DrainingStorage {
    async fn put(
        &self,
        _creds: &StorageCredentials,
        mut body: MeteredStream,
    ) -> Result<(), UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        while let Some(chunk) = body.next().await {
            chunk.map_err(UploadError::storage)?;
        }
        Ok(())
    }
}

/// Storage that consumes one chunk, then fails as if the transport dropped
#[derive(Default)]
struct FailingStorage {
    calls: AtomicUsize,
}

#[async_trait]
impl StorageUploader for FailingStorage {
    async fn put(
        &self,
        _creds: &StorageCredentials,
        mut body: MeteredStream,
    ) -> Result<(), UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = body.next().await;
        Err(UploadError::storage(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset mid-transfer",
        )))
    }
}

async fn mock_credentials(server: &MockServer, expect: u64) {
    Mock::given(method("GET"))
        .and(path("/uploads/v1/acme/credentials"))
        .and(query_param("access_token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "key": "k1",
            "bucket": "b1",
            "accessKeyId": "AKIA123",
            "secretAccessKey": "secret"
        })))
        .expect(expect)
        .mount(server)
        .await;
}

async fn mock_finalize(server: &MockServer, expect: u64) {
    Mock::given(method("POST"))
        .and(path("/uploads/v1/acme"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "acme.mytileset",
            "status": "queued"
        })))
        .expect(expect)
        .mount(server)
        .await;
}

fn source_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&vec![0x42u8; 64 * 1024]).unwrap();
    file.flush().unwrap();
    file
}

fn options(host: String, file: &tempfile::NamedTempFile) -> UploadOptions {
    UploadOptions::from_file(file.path())
        .account("acme")
        .access_token("tok")
        .map_id("acme.mytileset")
        .host(host)
}

#[tokio::test]
async fn test_successful_upload_emits_progress_then_finished() {
    let server = MockServer::start().await;
    mock_credentials(&server, 1).await;
    mock_finalize(&server, 1).await;

    let file = source_file();
    let storage = Arc::new(DrainingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let mut handle = uploader.upload(options(server.uri(), &file));

    let mut samples = Vec::new();
    let mut terminal = None;
    while let Some(event) = handle.recv().await {
        assert!(terminal.is_none(), "event after terminal: {event:?}");
        match event {
            UploadEvent::Progress(sample) => samples.push(sample),
            other => terminal = Some(other),
        }
    }

    match terminal {
        Some(UploadEvent::Finished(job)) => {
            assert_eq!(job.id.as_deref(), Some("acme.mytileset"));
            assert_eq!(job.status.as_deref(), Some("queued"));
        }
        other => panic!("expected finished, got {other:?}"),
    }

    // At least one sample saw the full transfer, samples never regress.
    assert!(!samples.is_empty());
    assert!(samples.iter().any(|s| s.bytes_transferred > 0));
    assert!(samples
        .windows(2)
        .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred));
    assert_eq!(
        samples.last().unwrap().total_bytes,
        Some(64 * 1024),
        "file length seeds progress measurement"
    );
    assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_credential_rejection_skips_storage_and_finalize() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/uploads/v1/acme/credentials"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(serde_json::json!({"message": "forbidden"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    mock_finalize(&server, 0).await;

    let file = source_file();
    let storage = Arc::new(DrainingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let err = uploader.upload(options(server.uri(), &file)).wait().await.unwrap_err();

    match err {
        UploadError::RemoteService { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "forbidden");
        }
        other => panic!("expected remote service error, got {other:?}"),
    }
    assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validation_failure_makes_no_network_calls() {
    let server = MockServer::start().await;
    mock_credentials(&server, 0).await;
    mock_finalize(&server, 0).await;

    let file = source_file();
    let storage = Arc::new(DrainingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let opts = options(server.uri(), &file).map_id("other.tileset");
    let mut handle = uploader.upload(opts);

    // The very first event on the channel is the validation failure.
    match handle.recv().await.unwrap() {
        UploadEvent::Failed(UploadError::Validation(msg)) => {
            assert!(msg.contains("other.tileset"));
            assert!(msg.contains("acme"));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert!(handle.recv().await.is_none());
    assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_storage_failure_prevents_finalization() {
    let server = MockServer::start().await;
    mock_credentials(&server, 1).await;
    mock_finalize(&server, 0).await;

    let file = source_file();
    let storage = Arc::new(FailingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let err = uploader.upload(options(server.uri(), &file)).wait().await.unwrap_err();

    match err {
        UploadError::StorageUpload { source } => {
            assert!(source.to_string().contains("connection reset"));
        }
        other => panic!("expected storage upload error, got {other:?}"),
    }
    assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreadable_source_fails_before_storage() {
    let server = MockServer::start().await;
    mock_credentials(&server, 1).await;
    mock_finalize(&server, 0).await;

    let storage = Arc::new(DrainingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let opts = UploadOptions::from_file("/nonexistent/tiles.mbtiles")
        .account("acme")
        .access_token("tok")
        .map_id("acme.mytileset")
        .host(server.uri());
    let err = uploader.upload(opts).wait().await.unwrap_err();

    assert!(matches!(err, UploadError::SourceOpen { .. }));
    assert_eq!(storage.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stream_source_without_length_runs_degraded() {
    let server = MockServer::start().await;
    mock_credentials(&server, 1).await;
    mock_finalize(&server, 1).await;

    let storage = Arc::new(DrainingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let opts = UploadOptions::from_stream(std::io::Cursor::new(vec![0x42u8; 2048]))
        .account("acme")
        .access_token("tok")
        .map_id("acme.mytileset")
        .host(server.uri());
    let mut handle = uploader.upload(opts);

    let mut finished = false;
    while let Some(event) = handle.recv().await {
        match event {
            UploadEvent::Progress(sample) => {
                // Byte counts only; no total, no percentage.
                assert_eq!(sample.total_bytes, None);
                assert_eq!(sample.percentage(), None);
            }
            UploadEvent::Finished(_) => finished = true,
            UploadEvent::Failed(err) => panic!("upload failed: {err}"),
        }
    }
    assert!(finished);
}

#[tokio::test]
async fn test_declared_length_seeds_percentage() {
    let server = MockServer::start().await;
    mock_credentials(&server, 1).await;
    mock_finalize(&server, 1).await;

    let storage = Arc::new(DrainingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let opts = UploadOptions::from_stream(std::io::Cursor::new(vec![0x42u8; 2048]))
        .length(2048)
        .account("acme")
        .access_token("tok")
        .map_id("acme.mytileset")
        .host(server.uri());
    let mut handle = uploader.upload(opts);

    let mut last = None;
    while let Some(event) = handle.recv().await {
        match event {
            UploadEvent::Progress(sample) => last = Some(sample),
            UploadEvent::Finished(_) => {}
            UploadEvent::Failed(err) => panic!("upload failed: {err}"),
        }
    }

    let last = last.expect("at least one progress sample");
    assert_eq!(last.total_bytes, Some(2048));
    assert_eq!(last.bytes_transferred, 2048);
    assert_eq!(last.percentage(), Some(100.0));
}

#[tokio::test]
async fn test_parallel_uploads_share_nothing() {
    let server = MockServer::start().await;
    mock_credentials(&server, 2).await;
    mock_finalize(&server, 2).await;

    let file_a = source_file();
    let file_b = source_file();
    let storage = Arc::new(DrainingStorage::default());
    let uploader = Uploader::with_storage(storage.clone());

    let a = uploader.upload(options(server.uri(), &file_a));
    let b = uploader.upload(options(server.uri(), &file_b));

    let (a, b) = tokio::join!(a.wait(), b.wait());
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(storage.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_slow_transfer_emits_interval_samples() {
    let server = MockServer::start().await;
    mock_credentials(&server, 1).await;
    mock_finalize(&server, 1).await;

    /// Storage that drains slowly enough for the sampler to tick
    struct SlowStorage;

    #[async_trait]
    impl StorageUploader for SlowStorage {
        async fn put(
            &self,
            _creds: &StorageCredentials,
            mut body: MeteredStream,
        ) -> Result<(), UploadError> {
            while let Some(chunk) = body.next().await {
                chunk.map_err(UploadError::storage)?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        }
    }

    let file = source_file();
    let uploader =
        Uploader::with_storage(Arc::new(SlowStorage)).progress_interval(Duration::from_millis(2));

    let mut handle = uploader.upload(options(server.uri(), &file));

    let mut sample_count = 0;
    while let Some(event) = handle.recv().await {
        if let UploadEvent::Progress(_) = event {
            sample_count += 1;
        }
    }
    assert!(sample_count > 1, "sampler ticked during the transfer");
}
