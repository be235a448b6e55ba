//! Tileset Uploadr Library
//!
//! Async client for turning a local file or byte stream into a hosted
//! tileset: it fetches short-lived storage credentials from the hosting
//! service, streams the asset into object storage while reporting progress,
//! and registers the stored object as a processing job.
//!
//! # Features
//!
//! - **Single event channel**: progress samples plus exactly one terminal
//!   outcome per upload call
//! - **Streaming**: sources are piped through a byte-metering stage into a
//!   storage upload, never buffered whole
//! - **Strict staging**: credentials, transfer and job registration run in
//!   sequence; a failed stage halts the pipeline
//! - **Secret hygiene**: storage credentials are redacted from debug output
//!
//! # Example
//!
//! ```no_run
//! use tileset_uploadr::{upload, UploadEvent, UploadOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tileset_uploadr::UploadError> {
//!     let opts = UploadOptions::from_file("tiles.mbtiles")
//!         .account("acme")
//!         .access_token("sk.mytoken")
//!         .map_id("acme.mytileset");
//!
//!     let mut handle = upload(opts);
//!     while let Some(event) = handle.recv().await {
//!         match event {
//!             UploadEvent::Progress(sample) => {
//!                 println!("{} bytes ({:?}%)", sample.bytes_transferred, sample.percentage());
//!             }
//!             UploadEvent::Finished(job) => println!("queued as {:?}", job.id),
//!             UploadEvent::Failed(err) => return Err(err),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod error;
pub mod events;
pub mod options;
pub mod progress;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use api::{JobDescriptor, StorageCredentials};
pub use error::UploadError;
pub use events::{UploadEvent, UploadHandle};
pub use options::{UploadOptions, UploadRequest, DEFAULT_HOST};
pub use progress::ProgressSample;
pub use storage::{test_credentials, S3StorageUploader, StorageUploader};
pub use upload::{upload, Uploader, PROGRESS_INTERVAL};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
