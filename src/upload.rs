//! Upload orchestration
//!
//! [`Uploader::upload`] runs the full pipeline on a background task and
//! returns the event channel immediately, so observers can attach before any
//! stage completes. Stages execute in strict sequence:
//!
//! ```text
//! Init -> Validated -> CredentialsAcquired -> Stored -> Finalized
//! ```
//!
//! with failure reachable from every non-terminal state. Each stage runs its
//! network call exactly once; a failed stage halts the pipeline and becomes
//! the single terminal event. Even validation failures are delivered through
//! the channel rather than returned from the call.

use crate::api::{self, JobDescriptor, StorageCredentials};
use crate::error::UploadError;
use crate::events::{UploadEvent, UploadHandle};
use crate::options::{Source, UploadOptions, UploadRequest};
use crate::progress::{MeteredStream, ProgressCounter};
use crate::storage::{S3StorageUploader, StorageUploader};
use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::io::ReaderStream;

/// Default wall-clock spacing between progress samples
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Runs upload calls against a storage backend
pub struct Uploader {
    storage: Arc<dyn StorageUploader>,
    progress_interval: Duration,
}

impl Default for Uploader {
    fn default() -> Self {
        Self::new()
    }
}

impl Uploader {
    /// Uploader backed by S3
    pub fn new() -> Self {
        Self::with_storage(Arc::new(S3StorageUploader::new()))
    }

    /// Uploader with a custom storage backend
    pub fn with_storage(storage: Arc<dyn StorageUploader>) -> Self {
        Self {
            storage,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    /// Override the progress sampling interval
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Start one upload call
    ///
    /// Returns the event channel before validation runs. Independent calls
    /// share nothing and proceed fully in parallel.
    pub fn upload(&self, opts: UploadOptions) -> UploadHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let storage = Arc::clone(&self.storage);
        let interval = self.progress_interval;

        tokio::spawn(async move {
            let outcome = run(opts, storage.as_ref(), interval, &tx).await;
            // The single terminal event for this call. Send failure means the
            // handle was dropped, which does not cancel the upload.
            let _ = tx.send(match outcome {
                Ok(job) => UploadEvent::Finished(job),
                Err(err) => UploadEvent::Failed(err),
            });
        });

        UploadHandle::new(rx)
    }
}

/// Upload with the default S3 backend
pub fn upload(opts: UploadOptions) -> UploadHandle {
    Uploader::new().upload(opts)
}

async fn run(
    opts: UploadOptions,
    storage: &dyn StorageUploader,
    interval: Duration,
    events: &mpsc::UnboundedSender<UploadEvent>,
) -> Result<JobDescriptor, UploadError> {
    // Init -> Validated, before any network activity.
    let mut req = opts.into_request()?;
    let http = api::http_client(req.proxy())?;

    // Validated -> CredentialsAcquired
    let creds = api::fetch_credentials(&http, &req).await?;

    // CredentialsAcquired -> Stored
    stream_upload(&mut req, &creds, storage, interval, events).await?;

    // Stored -> Finalized
    api::create_upload(&http, &req, &creds).await
}

/// Streaming upload engine: resolve the source, meter it, hand it to storage
async fn stream_upload(
    req: &mut UploadRequest,
    creds: &StorageCredentials,
    storage: &dyn StorageUploader,
    interval: Duration,
    events: &mpsc::UnboundedSender<UploadEvent>,
) -> Result<(), UploadError> {
    creds.ensure_complete()?;

    let counter = ProgressCounter::new();
    if let Some(length) = req.declared_length {
        counter.set_total(length);
    }

    let source = match req.take_source() {
        Some(source) => source,
        None => {
            return Err(UploadError::Validation(
                "\"file\" or \"stream\" option required".into(),
            ))
        }
    };

    let stream: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync + Unpin> = match source
    {
        Source::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| UploadError::SourceOpen {
                    path: path.clone(),
                    source: e,
                })?;
            if req.declared_length.is_none() {
                let metadata = file
                    .metadata()
                    .await
                    .map_err(|e| UploadError::SourceOpen {
                        path: path.clone(),
                        source: e,
                    })?;
                counter.set_total(metadata.len());
            }
            Box::new(ReaderStream::new(file))
        }
        // Without a declared length this runs in degraded progress mode:
        // byte counts only, no percentage.
        Source::Stream(reader) => Box::new(ReaderStream::new(reader)),
    };

    let body = MeteredStream::new(stream, counter.clone());

    // Sampler ticks concurrently with the transfer and is stopped and
    // drained before any terminal event can be sent.
    let (stop_tx, stop_rx) = oneshot::channel();
    let sampler = tokio::spawn(sample_loop(
        counter.clone(),
        events.clone(),
        interval,
        stop_rx,
    ));

    let result = storage.put(creds, body).await;

    let _ = stop_tx.send(());
    let _ = sampler.await;

    result
}

/// Emit a progress sample per tick, plus one final sample on stop
async fn sample_loop(
    counter: ProgressCounter,
    events: mpsc::UnboundedSender<UploadEvent>,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = &mut stop => {
                let _ = events.send(UploadEvent::Progress(counter.sample(last.elapsed())));
                break;
            }
            _ = ticker.tick() => {
                let _ = events.send(UploadEvent::Progress(counter.sample(last.elapsed())));
                last = Instant::now();
            }
        }
    }
}
