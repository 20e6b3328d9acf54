//! Video record handshake
//!
//! Registers a file with the backend and obtains the credentials its
//! transfer session will use. The same backend receives the final
//! success/error report through [`VideoBackend::finalize`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::upload::error::UploadError;
use crate::upload::types::{FinalizeStatus, HandshakeResult, UploadItem};

/// Backend endpoints used by the orchestrator
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Register a video record and receive upload credentials
    async fn create_record(
        &self,
        name: &str,
        group_id: &str,
        file_name: &str,
    ) -> Result<HandshakeResult, UploadError>;

    /// Report the final outcome of an upload
    async fn finalize(&self, video_id: &str, status: FinalizeStatus) -> Result<(), UploadError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRecordRequest<'a> {
    name: &'a str,
    group_id: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    video: VideoRecord,
    #[serde(default)]
    servers: Vec<UploadServer>,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoRecord {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(deserialize_with = "string_or_number")]
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadServer {
    hostname: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequest<'a> {
    video_id: &'a str,
    status: FinalizeStatus,
}

/// Ids come back as either JSON strings or numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

impl CreateRecordResponse {
    fn into_result(self) -> Result<HandshakeResult, UploadError> {
        let hostname = self
            .servers
            .into_iter()
            .map(|s| s.hostname)
            .find(|h| !h.is_empty())
            .ok_or_else(|| UploadError::Handshake("no upload server assigned".to_string()))?;

        if self.token.is_empty() {
            return Err(UploadError::Handshake("empty upload token".to_string()));
        }

        Ok(HandshakeResult {
            client_id: self.video.client_id,
            video_id: self.video.id,
            hostname,
            token: self.token,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP backend
// ═══════════════════════════════════════════════════════════════════════════

/// reqwest-based backend client
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(self.endpoint(path));
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl VideoBackend for HttpBackend {
    async fn create_record(
        &self,
        name: &str,
        group_id: &str,
        file_name: &str,
    ) -> Result<HandshakeResult, UploadError> {
        let response = self
            .post("create-record")
            .json(&CreateRecordRequest {
                name,
                group_id,
                file_name,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Handshake(format!(
                "create-record returned HTTP {}",
                status
            )));
        }

        response.json::<CreateRecordResponse>().await?.into_result()
    }

    async fn finalize(&self, video_id: &str, status: FinalizeStatus) -> Result<(), UploadError> {
        let response = self
            .post("finalize")
            .json(&FinalizeRequest { video_id, status })
            .send()
            .await?;

        let http_status = response.status();
        if !http_status.is_success() {
            return Err(UploadError::Finalize(format!(
                "finalize returned HTTP {}",
                http_status
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Handshake client
// ═══════════════════════════════════════════════════════════════════════════

/// Runs the create-record exchange for one upload item
#[derive(Clone)]
pub struct HandshakeClient {
    backend: Arc<dyn VideoBackend>,
    group_id: String,
}

impl HandshakeClient {
    pub fn new(backend: Arc<dyn VideoBackend>, group_id: impl Into<String>) -> Self {
        Self {
            backend,
            group_id: group_id.into(),
        }
    }

    /// Register `item` with the backend.
    ///
    /// Every failure comes back as [`UploadError::Handshake`].
    pub async fn create_record(&self, item: &UploadItem) -> Result<HandshakeResult, UploadError> {
        let title = std::path::Path::new(&item.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.name.clone());

        debug!("create-record for {} ({})", item.id, item.name);

        match self
            .backend
            .create_record(&title, &self.group_id, &item.name)
            .await
        {
            Ok(result) => {
                info!(
                    "Handshake for {} bound to video {} on {}",
                    item.id, result.video_id, result.hostname
                );
                Ok(result)
            }
            Err(UploadError::Handshake(msg)) => {
                warn!("Handshake rejected for {}: {}", item.id, msg);
                Err(UploadError::Handshake(msg))
            }
            Err(e) => {
                warn!("Handshake failed for {}: {}", item.id, e);
                Err(UploadError::Handshake(e.to_string()))
            }
        }
    }
}
