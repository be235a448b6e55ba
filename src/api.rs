//! Hosting service API client
//!
//! Two operations against the hosting service, each a single round trip with
//! no retries: exchanging the access token for time-boxed storage credentials
//! ([`fetch_credentials`]) and registering the stored object as a processing
//! job ([`create_upload`]).
//!
//! # Endpoints
//!
//! | Operation | Request | Success |
//! |-----------|---------|---------|
//! | Fetch credentials | `GET {host}/uploads/v1/{account}/credentials?access_token={token}` | 200 with `{key, bucket, ...}` |
//! | Create upload | `POST {host}/uploads/v1/{account}?access_token={token}` | 201 with the job descriptor |

use crate::error::UploadError;
use crate::options::UploadRequest;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Short-lived, scoped authorization to write one object to storage
///
/// Treated as a capability token: held only for the lifetime of one upload
/// call, never persisted, and the secret fields are redacted from `Debug`
/// output so they cannot leak into logs.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageCredentials {
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
}

impl StorageCredentials {
    /// Create credentials for a known bucket and object key
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Attach a session token (for temporary credentials)
    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key the credentials are scoped to
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Public URL of the stored object, registered with the hosting service
    pub fn object_url(&self) -> String {
        format!("http://{}.s3.amazonaws.com/{}", self.bucket, self.key)
    }

    /// Fail with [`UploadError::InvalidCredentials`] unless both `key` and
    /// `bucket` are usable
    pub fn ensure_complete(&self) -> Result<(), UploadError> {
        if self.key.is_empty() || self.bucket.is_empty() {
            return Err(UploadError::InvalidCredentials);
        }
        Ok(())
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[redacted]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// The hosting service's record of the registered processing job
///
/// Opaque beyond `id` and `status`; any further fields the service returns
/// are preserved in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Error body shape returned by the hosting service
#[derive(Deserialize)]
struct ServiceMessage {
    message: Option<String>,
}

/// Extract the service's `message` field, falling back to a generic message
fn error_message(body: &[u8], fallback: String) -> String {
    serde_json::from_slice::<ServiceMessage>(body)
        .ok()
        .and_then(|m| m.message)
        .unwrap_or(fallback)
}

/// Build the HTTP client for one upload call
pub(crate) fn http_client(proxy: Option<&str>) -> Result<reqwest::Client, UploadError> {
    let mut builder = reqwest::Client::builder();
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| UploadError::Validation(format!("invalid proxy \"{proxy}\": {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(UploadError::Network)
}

/// Exchange the account's access token for storage credentials
///
/// Single GET, no retries. Requires HTTP 200 and a body carrying non-empty
/// `key` and `bucket`.
#[tracing::instrument(
    name = "api.fetch_credentials",
    skip(http, req),
    fields(account = %req.account(), host = %req.host()),
    err
)]
pub async fn fetch_credentials(
    http: &reqwest::Client,
    req: &UploadRequest,
) -> Result<StorageCredentials, UploadError> {
    let url = format!(
        "{}/uploads/v1/{}/credentials?access_token={}",
        req.host(),
        req.account(),
        req.access_token()
    );

    let response = http
        .get(&url)
        .header(reqwest::header::HOST, req.host_header())
        .send()
        .await
        .map_err(UploadError::Network)?;

    let status = response.status();
    let body = response.bytes().await.map_err(UploadError::Network)?;

    if status != StatusCode::OK {
        return Err(UploadError::RemoteService {
            status: status.as_u16(),
            message: error_message(
                &body,
                format!("hosting service is not available: {}", status.as_u16()),
            ),
        });
    }

    // Malformed JSON is a parse failure; well-formed JSON of the wrong shape
    // (an array, a non-string key) is an incomplete credential payload.
    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(UploadError::ResponseParse)?;
    let creds: StorageCredentials =
        serde_json::from_value(value).map_err(|_| UploadError::InvalidCredentials)?;
    creds.ensure_complete()?;

    tracing::debug!(bucket = %creds.bucket(), "received storage credentials");
    Ok(creds)
}

#[derive(Serialize)]
struct CreateUploadBody<'a> {
    id: &'a str,
    url: String,
    data: &'a str,
}

/// Register the stored object with the hosting service as a processing job
///
/// Single POST, no retries. Requires HTTP 201; the parsed body is the
/// terminal [`JobDescriptor`].
#[tracing::instrument(
    name = "api.create_upload",
    skip(http, req, creds),
    fields(account = %req.account(), map_id = %req.map_id()),
    err
)]
pub async fn create_upload(
    http: &reqwest::Client,
    req: &UploadRequest,
    creds: &StorageCredentials,
) -> Result<JobDescriptor, UploadError> {
    creds.ensure_complete()?;

    let url = format!(
        "{}/uploads/v1/{}?access_token={}",
        req.host(),
        req.account(),
        req.access_token()
    );
    let body = CreateUploadBody {
        id: req.map_id(),
        url: creds.object_url(),
        data: req.map_id(),
    };

    let response = http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(UploadError::Network)?;

    let status = response.status();
    let body = response.bytes().await.map_err(UploadError::Network)?;

    if status != StatusCode::CREATED {
        return Err(UploadError::Finalization {
            status: status.as_u16(),
            message: error_message(
                &body,
                format!("upload registration failed: {}", status.as_u16()),
            ),
        });
    }

    let job: JobDescriptor = serde_json::from_slice(&body).map_err(UploadError::ResponseParse)?;
    tracing::info!(job_id = ?job.id, status = ?job.status, "upload registered");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_deserialize_wire_names() {
        let creds: StorageCredentials = serde_json::from_str(
            r#"{
                "key": "_pending/acme/abc",
                "bucket": "tile-staging",
                "accessKeyId": "AKIA123",
                "secretAccessKey": "secret",
                "sessionToken": "token"
            }"#,
        )
        .unwrap();
        assert_eq!(creds.key(), "_pending/acme/abc");
        assert_eq!(creds.bucket(), "tile-staging");
        assert_eq!(creds.access_key_id(), "AKIA123");
        assert_eq!(creds.session_token(), Some("token"));
        assert!(creds.ensure_complete().is_ok());
    }

    #[test]
    fn test_incomplete_credentials_rejected() {
        let creds: StorageCredentials = serde_json::from_str(r#"{"key": "k1"}"#).unwrap();
        assert!(matches!(
            creds.ensure_complete(),
            Err(UploadError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = StorageCredentials::new("b1", "k1", "AKIA123", "super-secret")
            .with_session_token("session-secret");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("session-secret"));
        assert!(debug.contains("b1"));
    }

    #[test]
    fn test_object_url() {
        let creds = StorageCredentials::new("b1", "k1", "a", "s");
        assert_eq!(creds.object_url(), "http://b1.s3.amazonaws.com/k1");
    }

    #[test]
    fn test_error_message_prefers_body_message() {
        assert_eq!(
            error_message(br#"{"message":"forbidden"}"#, "fallback".into()),
            "forbidden"
        );
        assert_eq!(error_message(b"not json", "fallback".into()), "fallback");
    }

    #[test]
    fn test_job_descriptor_keeps_extra_fields() {
        let job: JobDescriptor = serde_json::from_str(
            r#"{"id": "acme.mytileset", "status": "queued", "progress": 0}"#,
        )
        .unwrap();
        assert_eq!(job.id.as_deref(), Some("acme.mytileset"));
        assert_eq!(job.status.as_deref(), Some("queued"));
        assert!(job.extra.contains_key("progress"));
    }
}
