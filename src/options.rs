//! Upload options and validation
//!
//! [`UploadOptions`] is the raw, caller-supplied description of one upload.
//! [`UploadOptions::validate`] applies the validation rules without touching
//! the network or the filesystem; [`UploadOptions::into_request`] additionally
//! normalizes defaults (proxy from `HTTP_PROXY`, host from [`DEFAULT_HOST`])
//! and produces the immutable [`UploadRequest`] the pipeline runs on.
//!
//! The source is fixed at construction time: [`UploadOptions::from_file`] or
//! [`UploadOptions::from_stream`], never both.

use crate::error::UploadError;
use std::path::PathBuf;
use tokio::io::AsyncRead;

/// Default hosting service base URL
pub const DEFAULT_HOST: &str = "https://api.tiles.mapbox.com";

/// Byte source for one upload
pub(crate) enum Source {
    /// Local file, opened by the engine
    File(PathBuf),
    /// Caller-supplied readable stream
    Stream(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File(path) => f.debug_tuple("File").field(path).finish(),
            Source::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Caller-supplied options for one upload call
pub struct UploadOptions {
    source: Source,
    length: Option<u64>,
    account: String,
    access_token: String,
    map_id: String,
    host: Option<String>,
    proxy: Option<String>,
}

impl UploadOptions {
    /// Upload a local file
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(Source::File(path.into()))
    }

    /// Upload from an already-open stream
    ///
    /// Without [`length`](Self::length) the upload runs in a degraded
    /// progress mode: samples carry byte counts but no percentage.
    pub fn from_stream(reader: impl AsyncRead + Send + Sync + Unpin + 'static) -> Self {
        Self::new(Source::Stream(Box::new(reader)))
    }

    fn new(source: Source) -> Self {
        Self {
            source,
            length: None,
            account: String::new(),
            access_token: String::new(),
            map_id: String::new(),
            host: None,
            proxy: None,
        }
    }

    /// Account that owns the target map
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// API access token, passed through to the hosting service
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Target map id, namespaced by account (`"{account}.{name}"`)
    pub fn map_id(mut self, map_id: impl Into<String>) -> Self {
        self.map_id = map_id.into();
        self
    }

    /// Override the hosting service base URL
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// HTTP proxy for hosting service requests
    ///
    /// Defaults from the `HTTP_PROXY` environment variable when unset.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Declared source length in bytes, used to seed progress measurement
    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Check the validation rules without consuming the options
    ///
    /// Pure and idempotent. Each rule fails independently with
    /// [`UploadError::Validation`].
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.account.is_empty() {
            return Err(UploadError::Validation("\"account\" option required".into()));
        }
        if self.access_token.is_empty() {
            return Err(UploadError::Validation(
                "\"access_token\" option required".into(),
            ));
        }
        if self.map_id.is_empty() {
            return Err(UploadError::Validation("\"map_id\" option required".into()));
        }
        // The hosting service namespaces maps by account.
        if self.map_id.split('.').next() != Some(self.account.as_str()) {
            return Err(UploadError::Validation(format!(
                "invalid map id \"{}\" for account \"{}\"",
                self.map_id, self.account
            )));
        }
        if let Some(host) = &self.host {
            host_header(host)?;
        }
        Ok(())
    }

    /// Validate and normalize into an immutable [`UploadRequest`]
    pub fn into_request(self) -> Result<UploadRequest, UploadError> {
        self.validate()?;
        let host = self.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host_header = host_header(&host)?;
        let proxy = self.proxy.or_else(|| std::env::var("HTTP_PROXY").ok());
        Ok(UploadRequest {
            source: Some(self.source),
            declared_length: self.length,
            account: self.account,
            access_token: self.access_token,
            map_id: self.map_id,
            host,
            host_header,
            proxy,
        })
    }
}

/// Derive the `Host` header value from a base URL
fn host_header(host: &str) -> Result<String, UploadError> {
    let url = reqwest::Url::parse(host)
        .map_err(|e| UploadError::Validation(format!("invalid host URL \"{host}\": {e}")))?;
    let name = url
        .host_str()
        .ok_or_else(|| UploadError::Validation(format!("invalid host URL \"{host}\": no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{name}:{port}"),
        None => name.to_string(),
    })
}

/// Validated, normalized request for one upload call
///
/// Immutable after construction; owned by the orchestrator for the duration
/// of the call.
#[derive(Debug)]
pub struct UploadRequest {
    // Consumed exactly once by the streaming engine.
    pub(crate) source: Option<Source>,
    pub(crate) declared_length: Option<u64>,
    account: String,
    access_token: String,
    map_id: String,
    host: String,
    host_header: String,
    proxy: Option<String>,
}

impl UploadRequest {
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `Host` header value derived from the base URL
    pub fn host_header(&self) -> &str {
        &self.host_header
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub(crate) fn access_token(&self) -> &str {
        &self.access_token
    }

    pub(crate) fn take_source(&mut self) -> Option<Source> {
        self.source.take()
    }
}
