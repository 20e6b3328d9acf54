//! Resumable chunked upload target
//!
//! Speaks a tus-style protocol against `https://{hostname}/upload/`:
//! `HEAD` discovers the committed offset, `PATCH` appends one chunk and
//! answers with the new committed offset.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use crate::upload::error::UploadError;
use crate::upload::types::HandshakeResult;

const TUS_VERSION: &str = "1.0.0";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Per-file metadata sent alongside every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub filename: String,
    pub filetype: String,
    /// Resumption fingerprint
    pub fingerprint: String,
    pub total_size: u64,
}

impl TransferMetadata {
    pub fn new(filename: &str, fingerprint: String, total_size: u64) -> Self {
        let filetype = mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            filename: filename.to_string(),
            filetype,
            fingerprint,
            total_size,
        }
    }
}

/// Byte sink for one upload's chunks
#[async_trait]
pub trait UploadTarget: Send + Sync {
    /// Offset the server already committed for this upload, if it knows it
    async fn discover_offset(
        &self,
        credentials: &HandshakeResult,
        metadata: &TransferMetadata,
    ) -> Result<Option<u64>, UploadError>;

    /// Send `chunk` starting at `offset`; returns the new committed offset
    async fn send_chunk(
        &self,
        credentials: &HandshakeResult,
        metadata: &TransferMetadata,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, UploadError>;
}

/// Encode the `Upload-Metadata` header: comma separated `key base64(value)` pairs
pub fn encode_metadata(credentials: &HandshakeResult, metadata: &TransferMetadata) -> String {
    [
        ("filename", metadata.filename.as_str()),
        ("filetype", metadata.filetype.as_str()),
        ("token", credentials.token.as_str()),
        ("clientId", credentials.client_id.as_str()),
        ("videoId", credentials.video_id.as_str()),
    ]
    .iter()
    .map(|(key, value)| format!("{} {}", key, STANDARD.encode(value)))
    .collect::<Vec<_>>()
    .join(",")
}

/// Read the `Upload-Offset` header
pub fn parse_offset_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Upload-Offset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// reqwest-based upload target
pub struct HttpUploadTarget {
    client: reqwest::Client,
    scheme: String,
}

impl HttpUploadTarget {
    pub fn new(timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            scheme: "https".to_string(),
        })
    }

    /// Use plain HTTP (local test servers)
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    fn upload_url(&self, credentials: &HandshakeResult) -> String {
        format!("{}://{}/upload/", self.scheme, credentials.hostname)
    }
}

#[async_trait]
impl UploadTarget for HttpUploadTarget {
    async fn discover_offset(
        &self,
        credentials: &HandshakeResult,
        metadata: &TransferMetadata,
    ) -> Result<Option<u64>, UploadError> {
        let response = self
            .client
            .head(self.upload_url(credentials))
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Metadata", encode_metadata(credentials, metadata))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            s if s.is_success() => {
                let offset = parse_offset_header(response.headers());
                debug!("Offset discovery for {}: {:?}", metadata.fingerprint, offset);
                Ok(offset)
            }
            s => Err(UploadError::from_status("offset discovery", s)),
        }
    }

    async fn send_chunk(
        &self,
        credentials: &HandshakeResult,
        metadata: &TransferMetadata,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, UploadError> {
        let len = chunk.len() as u64;
        let response = self
            .client
            .patch(self.upload_url(credentials))
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Offset", offset)
            .header("Upload-Length", metadata.total_size)
            .header("Upload-Metadata", encode_metadata(credentials, metadata))
            .header(CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .body(chunk)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::from_status("chunk upload", status));
        }

        Ok(parse_offset_header(response.headers()).unwrap_or(offset + len))
    }
}
