//! Upload Event System
//!
//! Progress and status transitions are published on a broadcast channel.
//! The display layer subscribes; the orchestrator never calls into it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::{PreviewHandle, UploadStatus};

/// Events buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1024;

/// Upload event types emitted to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UploadEvent {
    /// Acknowledged bytes advanced (or were reset at session start)
    #[serde(rename_all = "camelCase")]
    Progress {
        id: String,
        uploaded_size: u64,
        total_size: u64,
    },
    /// Status changed along a state machine edge
    StatusChanged {
        id: String,
        status: UploadStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Item removed; the preview handle, if any, should be released
    Removed {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        preview: Option<PreviewHandle>,
    },
}

impl UploadEvent {
    pub fn id(&self) -> &str {
        match self {
            UploadEvent::Progress { id, .. }
            | UploadEvent::StatusChanged { id, .. }
            | UploadEvent::Removed { id, .. } => id,
        }
    }
}

/// Event emitter for the upload orchestrator
#[derive(Clone)]
pub struct UploadEventEmitter {
    tx: broadcast::Sender<UploadEvent>,
}

impl UploadEventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    /// Emit an upload event; dropped silently when nobody listens
    pub fn emit(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit_progress(&self, id: &str, uploaded_size: u64, total_size: u64) {
        self.emit(UploadEvent::Progress {
            id: id.to_string(),
            uploaded_size,
            total_size,
        });
    }

    pub fn emit_status_changed(&self, id: &str, status: UploadStatus, error: Option<String>) {
        self.emit(UploadEvent::StatusChanged {
            id: id.to_string(),
            status,
            error,
        });
    }

    pub fn emit_removed(&self, id: &str, preview: Option<PreviewHandle>) {
        self.emit(UploadEvent::Removed {
            id: id.to_string(),
            preview,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for UploadEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UploadEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadEventEmitter")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
