//! Completion notifier
//!
//! Reports the terminal outcome of an upload to the backend. Delivery is
//! best-effort: a failed finalize call is logged and never retried.

use std::sync::Arc;

use tracing::{info, warn};

use crate::upload::handshake::VideoBackend;
use crate::upload::types::FinalizeStatus;

#[derive(Clone)]
pub struct CompletionNotifier {
    backend: Arc<dyn VideoBackend>,
}

impl CompletionNotifier {
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self { backend }
    }

    /// Finalize with `status=success`; returns whether the backend accepted it
    pub async fn notify_success(&self, video_id: &str) -> bool {
        self.notify(video_id, FinalizeStatus::Success).await
    }

    /// Finalize with `status=error`; returns whether the backend accepted it
    pub async fn notify_failure(&self, video_id: &str) -> bool {
        self.notify(video_id, FinalizeStatus::Error).await
    }

    async fn notify(&self, video_id: &str, status: FinalizeStatus) -> bool {
        match self.backend.finalize(video_id, status).await {
            Ok(()) => {
                info!("Finalized video {} as {:?}", video_id, status);
                true
            }
            Err(e) => {
                warn!("Finalize {:?} for video {} failed: {}", status, video_id, e);
                false
            }
        }
    }
}
