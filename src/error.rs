//! Upload error taxonomy
//!
//! Every failure, regardless of the stage it originates in, is delivered
//! exactly once through the upload call's event channel as a terminal
//! [`UploadEvent::Failed`](crate::events::UploadEvent::Failed). No stage
//! retries on its own; retry and backoff policy belong to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by an upload call
#[derive(Error, Debug)]
pub enum UploadError {
    /// Bad caller input, detected before any network activity
    #[error("{0}")]
    Validation(String),

    /// Transport-level failure (DNS, connection refused, timeout)
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Malformed JSON body from the hosting service
    #[error("failed to parse response body: {0}")]
    ResponseParse(#[source] serde_json::Error),

    /// Well-formed credential payload missing a usable key or bucket
    #[error("credentials response missing \"key\" or \"bucket\"")]
    InvalidCredentials,

    /// Non-success HTTP status from the hosting service API
    #[error("hosting service error ({status}): {message}")]
    RemoteService { status: u16, message: String },

    /// Local source file could not be opened
    #[error("failed to open source {path:?}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure while streaming the object into storage
    #[error("storage upload failed: {source}")]
    StorageUpload {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Job registration rejected (anything other than HTTP 201)
    #[error("upload registration failed ({status}): {message}")]
    Finalization { status: u16, message: String },

    /// Required environment variable not set
    #[error("env var {0} required")]
    MissingEnvironment(&'static str),
}

impl UploadError {
    /// Wrap an arbitrary cause as a storage upload failure
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::StorageUpload {
            source: source.into(),
        }
    }
}
