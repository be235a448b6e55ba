//! Object storage
//!
//! The streaming engine hands its metered byte stream to a
//! [`StorageUploader`]. The production implementation is
//! [`S3StorageUploader`], which delegates the transfer to the AWS SDK;
//! chunking, part retries and checksum verification stay inside the SDK.
//! Tests substitute their own implementation at this seam.

use crate::api::StorageCredentials;
use crate::error::UploadError;
use crate::progress::MeteredStream;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_smithy_types::body::SdkBody;
use futures::StreamExt;
use http_body_util::StreamBody;

/// Region the hosting service issues credentials for
pub const DEFAULT_REGION: &str = "us-east-1";

// Objects under this bucket's testing prefix are deleted daily by a
// lifecycle rule.
const TEST_BUCKET: &str = "mapbox-upload-testing";

/// Writes one object to storage from a metered byte stream
#[async_trait]
pub trait StorageUploader: Send + Sync {
    /// Stream the body into the object named by the credentials
    ///
    /// Resolves once the object is fully delivered; any failure wraps the
    /// cause in [`UploadError::StorageUpload`].
    async fn put(&self, creds: &StorageCredentials, body: MeteredStream)
        -> Result<(), UploadError>;
}

/// S3 uploader backed by `aws-sdk-s3`
#[derive(Debug, Clone)]
pub struct S3StorageUploader {
    region: String,
    endpoint: Option<String>,
}

impl Default for S3StorageUploader {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
        }
    }
}

impl S3StorageUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the storage endpoint (S3-compatible services, local stacks)
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Build an SDK client scoped to one set of upload credentials
    fn client(&self, creds: &StorageCredentials) -> aws_sdk_s3::Client {
        let provider = aws_credential_types::Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            creds.session_token().map(str::to_string),
            None,
            "tileset-uploadr",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(provider);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        aws_sdk_s3::Client::from_conf(builder.build())
    }
}

#[async_trait]
impl StorageUploader for S3StorageUploader {
    #[tracing::instrument(
        name = "storage.put_object",
        skip(self, creds, body),
        fields(
            s3.bucket = %creds.bucket(),
            s3.key = %creds.key(),
            upload.total_bytes = ?body.total()
        ),
        err
    )]
    async fn put(
        &self,
        creds: &StorageCredentials,
        body: MeteredStream,
    ) -> Result<(), UploadError> {
        creds.ensure_complete()?;

        let client = self.client(creds);
        let total = body.total();

        let frames = body.map(|chunk| {
            chunk
                .map(http_body::Frame::data)
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        });
        let sdk_body = SdkBody::from_body_1_x(StreamBody::new(frames));

        let mut request = client
            .put_object()
            .bucket(creds.bucket())
            .key(creds.key())
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::new(sdk_body));
        if let Some(total) = total {
            request = request.content_length(total as i64);
        }

        let output = request.send().await.map_err(UploadError::storage)?;
        tracing::info!(etag = ?output.e_tag(), "object stored");
        Ok(())
    }
}

/// Generate credentials for the shared testing bucket
///
/// Reads `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` (required) and
/// `AWS_SESSION_TOKEN` (optional) from the environment and scopes the
/// credentials to a random object key under the testing prefix. A missing
/// required variable fails with [`UploadError::MissingEnvironment`].
pub fn test_credentials() -> Result<StorageCredentials, UploadError> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .map_err(|_| UploadError::MissingEnvironment("AWS_ACCESS_KEY_ID"))?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .map_err(|_| UploadError::MissingEnvironment("AWS_SECRET_ACCESS_KEY"))?;

    let key = format!("_pending/test/{}", uuid::Uuid::new_v4().simple());
    let creds = StorageCredentials::new(TEST_BUCKET, key, access_key_id, secret_access_key);

    Ok(match std::env::var("AWS_SESSION_TOKEN") {
        Ok(token) => creds.with_session_token(token),
        Err(_) => creds,
    })
}
