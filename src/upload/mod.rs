//! Upload orchestration module
//!
//! Admission control, backend handshake, resumable chunked transfer,
//! connectivity-aware pause/resume and completion reporting.

pub mod connectivity;
pub mod error;
pub mod events;
pub mod handshake;
pub mod notifier;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod target;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::{ConnectivityMonitor, NetworkStatus};
pub use error::UploadError;
pub use events::{UploadEvent, UploadEventEmitter};
pub use handshake::{HandshakeClient, HttpBackend, VideoBackend};
pub use notifier::CompletionNotifier;
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use retry::{is_retryable_error, RetryConfig, DEFAULT_RETRY_DELAYS_SECS};
pub use session::{SessionHooks, SessionOutcome, TransferSession};
pub use target::{HttpUploadTarget, TransferMetadata, UploadTarget};
pub use transfer::{AdmissionController, SlotPermit, TransferControl};
pub use types::*;
