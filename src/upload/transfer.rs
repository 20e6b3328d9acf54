//! Transfer control and admission slots
//!
//! Provides the per-session pause/cancel handle and the bounded slot pool
//! that caps how many sessions move bytes at once.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::upload::error::UploadError;
use crate::upload::types::MAX_PARALLEL;

/// Upper bound accepted for the parallelism cap
pub const MAX_POSSIBLE_PARALLEL: usize = 10;

/// Transfer control signals
#[derive(Debug)]
pub struct TransferControl {
    /// Cancellation signal via watch channel
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    /// Pause signal via watch channel (independent from cancellation)
    pause_tx: watch::Sender<bool>,
    pause_rx: watch::Receiver<bool>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (pause_tx, pause_rx) = watch::channel(false);
        Self {
            cancel_tx,
            cancel_rx,
            pause_tx,
            pause_rx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_rx.borrow()
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    /// Fail fast if a signal is already raised
    pub fn check(&self) -> Result<(), UploadError> {
        if self.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        if self.is_paused() {
            return Err(UploadError::Paused);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the session is paused or cancelled first.
    ///
    /// Raising either signal drops `fut`, aborting whatever request it had in flight.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, UploadError> {
        self.check()?;

        let mut cancel_rx = self.cancel_rx.clone();
        let mut pause_rx = self.pause_rx.clone();

        tokio::select! {
            biased;
            _ = raised(&mut cancel_rx) => Err(UploadError::Cancelled),
            _ = raised(&mut pause_rx) => Err(UploadError::Paused),
            output = fut => Ok(output),
        }
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the flag turns true; never resolves if the sender is gone
async fn raised(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// RAII permit that decrements [`AdmissionController::active_count`] on drop.
///
/// Wraps the underlying `OwnedSemaphorePermit` so the slot is also
/// released automatically.
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    active_count: Arc<AtomicUsize>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let result =
            self.active_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match result {
            Ok(prev) => debug!("SlotPermit dropped, active count: {}", prev - 1),
            Err(_) => warn!("SlotPermit dropped with active_count already 0"),
        }
    }
}

impl std::fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPermit").finish_non_exhaustive()
    }
}

/// Bounded pool of active-session slots
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    active_count: Arc<AtomicUsize>,
    max_parallel: usize,
}

impl AdmissionController {
    pub fn new(max_parallel: usize) -> Self {
        let clamped = max_parallel.clamp(1, MAX_POSSIBLE_PARALLEL);
        info!("Admission controller sized for {} parallel uploads", clamped);
        Self {
            semaphore: Arc::new(Semaphore::new(clamped)),
            active_count: Arc::new(AtomicUsize::new(0)),
            max_parallel: clamped,
        }
    }

    /// Take a free slot without waiting
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        let new_count = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Acquired upload slot, active count: {}/{}",
            new_count, self.max_parallel
        );
        Some(SlotPermit {
            _permit: permit,
            active_count: self.active_count.clone(),
        })
    }

    /// Get current active session count
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(MAX_PARALLEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_slots_are_bounded() {
        let admission = AdmissionController::new(3);
        let a = admission.try_acquire().unwrap();
        let _b = admission.try_acquire().unwrap();
        let _c = admission.try_acquire().unwrap();
        assert!(admission.try_acquire().is_none());
        assert_eq!(admission.active_count(), 3);

        drop(a);
        assert_eq!(admission.active_count(), 2);
        assert!(admission.try_acquire().is_some());
    }

    #[test]
    fn test_max_parallel_is_clamped() {
        assert_eq!(AdmissionController::new(0).max_parallel(), 1);
        assert_eq!(AdmissionController::new(50).max_parallel(), MAX_POSSIBLE_PARALLEL);
        assert_eq!(AdmissionController::default().max_parallel(), MAX_PARALLEL);
    }

    #[tokio::test]
    async fn test_run_completes_without_signal() {
        let control = TransferControl::new();
        let value = control.run(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_pause_aborts_in_flight_future() {
        let control = Arc::new(TransferControl::new());

        let pauser = {
            let control = control.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                control.pause();
            })
        };

        let result = control.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(UploadError::Paused)));
        pauser.await.unwrap();

        // Raised signals short-circuit later calls
        assert!(matches!(control.run(async {}).await, Err(UploadError::Paused)));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_pause() {
        let control = TransferControl::new();
        control.pause();
        control.cancel();
        let result = control.run(async {}).await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }
}
