//! Upload data types

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of transfer sessions allowed to move bytes at once
pub const MAX_PARALLEL: usize = 3;

/// Default chunk size sent per request (2 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Upload status badge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Waiting for a free slot
    Queued,
    /// Slot held, bytes moving
    Uploading,
    /// Interrupted, resumption state kept
    Paused,
    /// All bytes acknowledged, finalize in flight
    Processing,
    /// Finalized successfully
    Uploaded,
    /// Handshake rejected or retries exhausted
    Failed,
}

impl UploadStatus {
    /// Whether `self -> next` is an edge of the upload state machine
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Queued, Uploading)
                | (Queued, Failed)
                | (Uploading, Paused)
                | (Uploading, Processing)
                | (Uploading, Failed)
                | (Processing, Uploaded)
                | (Paused, Uploading)
                | (Paused, Failed)
                | (Failed, Uploading)
        )
    }

    /// Statuses that still count as an in-flight upload for duplicate detection
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            UploadStatus::Queued
                | UploadStatus::Uploading
                | UploadStatus::Paused
                | UploadStatus::Processing
        )
    }
}

/// Opaque handle to a local preview resource (thumbnail, object URL)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewHandle(pub String);

/// A file handed over by the picker
#[derive(Debug, Clone)]
pub struct NewUpload {
    /// Local path of the file to send
    pub path: PathBuf,
    /// Display name, also sent as the remote file name
    pub name: String,
    /// Size the picker reported, checked against the file on disk
    pub size: u64,
    /// Preview resource to release when the item is removed
    pub preview: Option<PreviewHandle>,
}

impl NewUpload {
    /// Build a submission from a path, using the file name and on-disk size
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size = tokio::fs::metadata(&path).await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path,
            name,
            size,
            preview: None,
        })
    }
}

/// One file queued or in transit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    /// Client-generated id (UUID)
    pub id: String,
    /// Display name
    pub name: String,
    /// Local file path
    pub path: PathBuf,
    /// Total bytes to send
    pub total_size: u64,
    /// Bytes acknowledged by the upload target
    pub uploaded_size: u64,
    pub status: UploadStatus,
    /// Backend video id, bound once the handshake succeeds
    pub remote_video_id: Option<String>,
    pub preview: Option<PreviewHandle>,
    /// Last error message, cleared when the item starts again
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadItem {
    pub fn new(upload: NewUpload) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: upload.name,
            path: upload.path,
            total_size: upload.size,
            uploaded_size: 0,
            status: UploadStatus::Queued,
            remote_video_id: None,
            preview: upload.preview,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Calculate progress percentage (0-100)
    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            100.0
        } else {
            (self.uploaded_size as f64 / self.total_size as f64) * 100.0
        }
    }

    /// Identity used to match a resume against a partial transfer.
    ///
    /// Keyed on the file name only: two different files sharing a name collide.
    pub fn fingerprint(&self) -> String {
        self.name.clone()
    }
}

/// Transfer credentials returned by the backend handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    pub client_id: String,
    pub video_id: String,
    /// Upload target host (no scheme)
    pub hostname: String,
    pub token: String,
}

/// Final status reported to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeStatus {
    Success,
    Error,
}

/// Result of submitting a batch of files
#[derive(Debug, Default)]
pub struct SubmitReport {
    /// Ids of the newly queued items, in submission order
    pub accepted: Vec<String>,
    /// Files rejected by validation
    pub rejected: Vec<(String, super::UploadError)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(total: u64, uploaded: u64) -> UploadItem {
        let mut item = UploadItem::new(NewUpload {
            path: "/videos/a.mp4".into(),
            name: "a.mp4".into(),
            size: total,
            preview: None,
        });
        item.uploaded_size = uploaded;
        item
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(item(2048, 1024).progress_percent(), 50.0);
        assert_eq!(item(0, 0).progress_percent(), 100.0);
    }

    #[test]
    fn test_state_machine_edges() {
        use UploadStatus::*;
        assert!(Queued.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Uploading));
        assert!(Failed.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Uploaded));

        assert!(!Queued.can_transition_to(Paused));
        assert!(!Queued.can_transition_to(Uploaded));
        assert!(!Paused.can_transition_to(Queued));
        assert!(!Uploaded.can_transition_to(Uploading));
    }

    #[test]
    fn test_fingerprint_is_name() {
        assert_eq!(item(10, 0).fingerprint(), "a.mp4");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&UploadStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
