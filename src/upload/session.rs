//! Transfer Session
//!
//! Owns the chunked, resumable byte transfer for exactly one upload item.
//! Each attempt starts with offset discovery, then sends fixed-size chunks
//! from the discovered offset. Transport failures are retried on the
//! [`RetryConfig`] schedule; the counter resets whenever a chunk lands.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::upload::error::UploadError;
use crate::upload::retry::{is_retryable_error, RetryConfig};
use crate::upload::target::{TransferMetadata, UploadTarget};
use crate::upload::transfer::TransferControl;
use crate::upload::types::{HandshakeResult, UploadItem};

/// Callbacks a session uses to publish its progress
pub trait SessionHooks: Send + Sync {
    /// Session knows its starting offset and is about to send bytes.
    ///
    /// Returns false if the item no longer exists.
    fn on_start(&self, item_id: &str, offset: u64) -> bool;

    /// Server acknowledged bytes up to `acknowledged`
    fn on_progress(&self, item_id: &str, acknowledged: u64);
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Every byte acknowledged
    Completed,
    /// Pause signal raised; `started` tells whether bytes had begun moving
    Paused { started: bool },
    /// Item removed while the session ran
    Cancelled,
    /// Non-retryable error or schedule exhausted
    Failed(UploadError),
}

pub struct TransferSession {
    item_id: String,
    path: PathBuf,
    total_size: u64,
    metadata: TransferMetadata,
    credentials: HandshakeResult,
    control: Arc<TransferControl>,
    target: Arc<dyn UploadTarget>,
    retry: RetryConfig,
    chunk_size: usize,
}

impl TransferSession {
    pub fn new(
        item: &UploadItem,
        credentials: HandshakeResult,
        control: Arc<TransferControl>,
        target: Arc<dyn UploadTarget>,
        retry: RetryConfig,
        chunk_size: usize,
    ) -> Self {
        Self {
            item_id: item.id.clone(),
            path: item.path.clone(),
            total_size: item.total_size,
            metadata: TransferMetadata::new(&item.name, item.fingerprint(), item.total_size),
            credentials,
            control,
            target,
            retry,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn run(&self, hooks: &dyn SessionHooks) -> SessionOutcome {
        let mut attempt = 0usize;
        let mut started = false;

        loop {
            let Some(delay) = self.retry.delay_for(attempt) else {
                // delay_for always covers attempt 0
                return SessionOutcome::Failed(UploadError::Transfer(
                    "retry schedule exhausted".to_string(),
                ));
            };

            if !delay.is_zero() {
                debug!("Upload {} backing off {:?}", self.item_id, delay);
                if let Err(e) = self.control.run(tokio::time::sleep(delay)).await {
                    return self.interrupted(e, started);
                }
            }

            info!(
                "Upload attempt {}/{} for {}",
                attempt + 1,
                self.retry.max_attempts(),
                self.item_id
            );

            let mut progressed = false;
            match self.attempt(hooks, &mut started, &mut progressed).await {
                Ok(()) => {
                    info!("Upload {} sent all {} bytes", self.item_id, self.total_size);
                    return SessionOutcome::Completed;
                }
                Err(e @ (UploadError::Paused | UploadError::Cancelled)) => {
                    return self.interrupted(e, started);
                }
                Err(e) if is_retryable_error(&e) => {
                    if progressed {
                        attempt = 0;
                    }
                    attempt += 1;
                    if attempt >= self.retry.max_attempts() {
                        warn!(
                            "Upload {} failed after {} attempts: {}",
                            self.item_id, attempt, e
                        );
                        return SessionOutcome::Failed(UploadError::Transfer(format!(
                            "failed after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Upload {} attempt failed, will retry: {}", self.item_id, e);
                }
                Err(e) => {
                    warn!("Upload {} failed with non-retryable error: {}", self.item_id, e);
                    return SessionOutcome::Failed(e);
                }
            }
        }
    }

    fn interrupted(&self, error: UploadError, started: bool) -> SessionOutcome {
        match error {
            UploadError::Cancelled => {
                info!("Upload {} cancelled", self.item_id);
                SessionOutcome::Cancelled
            }
            _ => {
                info!("Upload {} paused", self.item_id);
                SessionOutcome::Paused { started }
            }
        }
    }

    async fn attempt(
        &self,
        hooks: &dyn SessionHooks,
        started: &mut bool,
        progressed: &mut bool,
    ) -> Result<(), UploadError> {
        let discovered = self
            .control
            .run(
                self.target
                    .discover_offset(&self.credentials, &self.metadata),
            )
            .await??;

        let mut offset = match discovered {
            Some(o) if o <= self.total_size => o,
            Some(o) => {
                warn!(
                    "Server offset {} exceeds size {} for {}, restarting from 0",
                    o, self.total_size, self.item_id
                );
                0
            }
            None => 0,
        };

        if *started {
            hooks.on_progress(&self.item_id, offset);
        } else {
            self.control.check()?;
            if !hooks.on_start(&self.item_id, offset) {
                return Err(UploadError::Cancelled);
            }
            *started = true;
            if offset > 0 {
                info!("Resuming {} from offset {}", self.item_id, offset);
            }
        }

        if offset >= self.total_size {
            return Ok(());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;

        while offset < self.total_size {
            let len = (self.total_size - offset).min(self.chunk_size as u64) as usize;
            let mut buffer = vec![0u8; len];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buffer).await?;

            let acknowledged = self
                .control
                .run(self.target.send_chunk(
                    &self.credentials,
                    &self.metadata,
                    offset,
                    Bytes::from(buffer),
                ))
                .await??;

            if acknowledged <= offset || acknowledged > self.total_size {
                return Err(UploadError::Transfer(format!(
                    "target acknowledged offset {} for chunk at {}",
                    acknowledged, offset
                )));
            }

            offset = acknowledged;
            *progressed = true;
            hooks.on_progress(&self.item_id, offset);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::testing::{write_video, FakeTarget};
    use crate::upload::types::NewUpload;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        starts: Mutex<Vec<u64>>,
        progress: Mutex<Vec<u64>>,
    }

    impl SessionHooks for RecordingHooks {
        fn on_start(&self, _item_id: &str, offset: u64) -> bool {
            self.starts.lock().push(offset);
            true
        }

        fn on_progress(&self, _item_id: &str, acknowledged: u64) {
            self.progress.lock().push(acknowledged);
        }
    }

    fn credentials() -> HandshakeResult {
        HandshakeResult {
            client_id: "c1".into(),
            video_id: "v1".into(),
            hostname: "up.test".into(),
            token: "tok".into(),
        }
    }

    fn session(
        item: &UploadItem,
        target: Arc<FakeTarget>,
        retry: RetryConfig,
    ) -> (TransferSession, Arc<TransferControl>) {
        let control = Arc::new(TransferControl::new());
        let session = TransferSession::new(item, credentials(), control.clone(), target, retry, 4);
        (session, control)
    }

    fn item_for(path: &std::path::Path, name: &str, size: u64) -> UploadItem {
        UploadItem::new(NewUpload {
            path: path.to_path_buf(),
            name: name.to_string(),
            size,
            preview: None,
        })
    }

    #[tokio::test]
    async fn test_sends_all_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "a.mp4", b"0123456789");
        let item = item_for(&path, "a.mp4", 10);
        let target = Arc::new(FakeTarget::new());
        let hooks = RecordingHooks::default();

        let (session, _control) = session(&item, target.clone(), RetryConfig::default());
        assert!(matches!(session.run(&hooks).await, SessionOutcome::Completed));

        assert_eq!(*hooks.starts.lock(), vec![0]);
        assert_eq!(*hooks.progress.lock(), vec![4, 8, 10]);
        assert_eq!(target.received("a.mp4"), b"0123456789".to_vec());
    }

    #[tokio::test]
    async fn test_resumes_from_discovered_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "b.mp4", b"abcdefghij");
        let item = item_for(&path, "b.mp4", 10);
        let target = Arc::new(FakeTarget::new());
        target.preload("b.mp4", b"abcdef");
        let hooks = RecordingHooks::default();

        let (session, _control) = session(&item, target.clone(), RetryConfig::default());
        assert!(matches!(session.run(&hooks).await, SessionOutcome::Completed));

        assert_eq!(*hooks.starts.lock(), vec![6]);
        assert_eq!(target.chunk_offsets("b.mp4"), vec![6]);
        assert_eq!(target.received("b.mp4"), b"abcdefghij".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "c.mp4", b"abcd");
        let item = item_for(&path, "c.mp4", 4);
        let target = Arc::new(FakeTarget::new());
        target.fail_next_sends(2);
        let hooks = RecordingHooks::default();

        let (session, _control) = session(&item, target.clone(), RetryConfig::default());
        let started_at = tokio::time::Instant::now();
        assert!(matches!(session.run(&hooks).await, SessionOutcome::Completed));

        // 0s + 3s + 5s of backoff before the third attempt
        assert!(started_at.elapsed() >= std::time::Duration::from_secs(8));
        assert_eq!(target.send_calls(), 3);
        assert_eq!(*hooks.starts.lock(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_schedule_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "d.mp4", b"abcd");
        let item = item_for(&path, "d.mp4", 4);
        let target = Arc::new(FakeTarget::new());
        target.fail_all_sends(true);
        let hooks = RecordingHooks::default();

        let (session, _control) = session(&item, target.clone(), RetryConfig::default());
        match session.run(&hooks).await {
            SessionOutcome::Failed(UploadError::Transfer(msg)) => {
                assert!(msg.contains("5 attempts"))
            }
            other => panic!("Expected Failed outcome, got {:?}", other),
        }
        assert_eq!(target.send_calls(), 5);
    }

    #[tokio::test]
    async fn test_pause_interrupts_blocked_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_video(dir.path(), "e.mp4", b"abcdefgh");
        let item = item_for(&path, "e.mp4", 8);
        let target = Arc::new(FakeTarget::gated());
        target.release(1);
        let hooks = Arc::new(RecordingHooks::default());

        let (session, control) = session(&item, target.clone(), RetryConfig::default());
        let task = {
            let hooks = hooks.clone();
            tokio::spawn(async move { session.run(hooks.as_ref()).await })
        };

        // First chunk lands, second blocks at the gate
        while hooks.progress.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        control.pause();

        match task.await.unwrap() {
            SessionOutcome::Paused { started } => assert!(started),
            other => panic!("Expected Paused outcome, got {:?}", other),
        }
        assert_eq!(*hooks.progress.lock(), vec![4]);
        assert_eq!(target.committed("e.mp4"), Some(4));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let item = item_for(&dir.path().join("gone.mp4"), "gone.mp4", 4);
        let target = Arc::new(FakeTarget::new());
        let hooks = RecordingHooks::default();

        let (session, _control) = session(&item, target, RetryConfig::default());
        assert!(matches!(
            session.run(&hooks).await,
            SessionOutcome::Failed(UploadError::Io(_))
        ));
    }
}
