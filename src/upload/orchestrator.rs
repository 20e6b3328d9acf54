//! Upload Orchestrator
//!
//! Owns every upload item, the FIFO admission queue and the slot pool.
//! Status transitions happen here and only along the edges allowed by
//! [`UploadStatus::can_transition_to`]; every transition and progress step
//! is published through the [`UploadEventEmitter`].
//!
//! Admission rules:
//! - a session needs a [`SlotPermit`]; the permit is held until the session
//!   has settled the item's status (paused, uploaded or failed)
//! - the queue holds ids waiting for a slot: fresh submissions, resumes and
//!   retries alike
//! - nothing is admitted while the network is offline

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::upload::connectivity::{ConnectivityMonitor, NetworkStatus};
use crate::upload::error::UploadError;
use crate::upload::events::{UploadEvent, UploadEventEmitter};
use crate::upload::handshake::{HandshakeClient, VideoBackend};
use crate::upload::notifier::CompletionNotifier;
use crate::upload::retry::RetryConfig;
use crate::upload::session::{SessionHooks, SessionOutcome, TransferSession};
use crate::upload::target::UploadTarget;
use crate::upload::transfer::{AdmissionController, SlotPermit, TransferControl};
use crate::upload::types::{
    HandshakeResult, NewUpload, SubmitReport, UploadItem, UploadStatus, DEFAULT_CHUNK_SIZE,
    MAX_PARALLEL,
};

/// Tunables for an [`Orchestrator`]
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub max_parallel: usize,
    pub chunk_size: usize,
    pub retry: RetryConfig,
    /// Grouping sent with every create-record call
    pub group_id: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_parallel: MAX_PARALLEL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryConfig::default(),
            group_id: String::new(),
        }
    }
}

/// Why a live session was asked to pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseReason {
    User,
    Offline,
}

struct LiveSession {
    control: Arc<TransferControl>,
    pause_reason: Option<PauseReason>,
}

#[derive(Default)]
struct State {
    items: HashMap<String, UploadItem>,
    /// Submission order
    order: Vec<String>,
    /// Ids waiting for a slot
    queue: VecDeque<String>,
    sessions: HashMap<String, LiveSession>,
    /// Handshake credentials, bound to the item that obtained them
    credentials: HashMap<String, HandshakeResult>,
}

impl State {
    /// Pop the first queued id that can start now and register its session.
    ///
    /// Ids whose item is gone or no longer startable are dropped; ids with a
    /// live session stay queued until that session settles.
    fn next_admissible(&mut self) -> Option<(String, Arc<TransferControl>)> {
        let mut index = 0;
        while index < self.queue.len() {
            let id = &self.queue[index];
            let startable = self.items.get(id).map(|item| {
                matches!(
                    item.status,
                    UploadStatus::Queued | UploadStatus::Paused | UploadStatus::Failed
                )
            });
            match startable {
                Some(true) if !self.sessions.contains_key(id) => {
                    let id = self.queue.remove(index)?;
                    let control = Arc::new(TransferControl::new());
                    self.sessions.insert(
                        id.clone(),
                        LiveSession {
                            control: control.clone(),
                            pause_reason: None,
                        },
                    );
                    return Some((id, control));
                }
                Some(true) => index += 1,
                _ => {
                    self.queue.remove(index);
                }
            }
        }
        None
    }

    fn is_queued(&self, id: &str) -> bool {
        self.queue.iter().any(|queued| queued == id)
    }
}

struct Inner {
    options: OrchestratorOptions,
    handshake: HandshakeClient,
    notifier: CompletionNotifier,
    target: Arc<dyn UploadTarget>,
    emitter: UploadEventEmitter,
    admission: AdmissionController,
    state: Mutex<State>,
    online: AtomicBool,
    /// Backend video id -> local item id
    video_index: DashMap<String, String>,
    /// Woken whenever a session ends or an item is removed
    settled: Notify,
}

/// Resumable, concurrency-bounded upload orchestrator.
///
/// Cheap to clone; clones share the same state. Must be used from within a
/// tokio runtime since admitted sessions are spawned as tasks.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        target: Arc<dyn UploadTarget>,
        options: OrchestratorOptions,
    ) -> Self {
        info!(
            "Upload orchestrator: {} parallel, {} byte chunks, {} attempts",
            options.max_parallel,
            options.chunk_size,
            options.retry.max_attempts()
        );
        let inner = Inner {
            handshake: HandshakeClient::new(backend.clone(), options.group_id.clone()),
            notifier: CompletionNotifier::new(backend),
            target,
            emitter: UploadEventEmitter::new(),
            admission: AdmissionController::new(options.max_parallel),
            state: Mutex::new(State::default()),
            online: AtomicBool::new(true),
            video_index: DashMap::new(),
            settled: Notify::new(),
            options,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Subscribe to progress and status events
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.emitter.subscribe()
    }

    /// Validate and enqueue files in FIFO order.
    ///
    /// A file whose name matches an upload still in flight is skipped
    /// without error.
    pub async fn submit(&self, files: Vec<NewUpload>) -> SubmitReport {
        let mut report = SubmitReport::default();
        let mut valid = Vec::with_capacity(files.len());

        for file in files {
            match validate(&file).await {
                Ok(()) => valid.push(file),
                Err(e) => {
                    warn!("Rejected {}: {}", file.name, e);
                    report.rejected.push((file.name, e));
                }
            }
        }

        {
            let mut state = self.inner.state.lock();
            for file in valid {
                let duplicate = state
                    .items
                    .values()
                    .any(|item| item.name == file.name && item.status.is_in_flight());
                if duplicate {
                    debug!("Ignoring duplicate submission of {}", file.name);
                    continue;
                }

                let item = UploadItem::new(file);
                info!("Queued upload {} ({}, {} bytes)", item.id, item.name, item.total_size);
                self.inner
                    .emitter
                    .emit_status_changed(&item.id, UploadStatus::Queued, None);
                state.order.push(item.id.clone());
                state.queue.push_back(item.id.clone());
                report.accepted.push(item.id.clone());
                state.items.insert(item.id.clone(), item);
            }
        }

        self.inner.pump();
        report
    }

    /// Pause an uploading item, keeping its resumption state.
    ///
    /// Returns `Ok(false)` when there was nothing to pause (already paused,
    /// queued, finished).
    pub fn pause(&self, id: &str) -> Result<bool, UploadError> {
        let mut state = self.inner.state.lock();
        let status = state
            .items
            .get(id)
            .map(|item| item.status)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        match status {
            UploadStatus::Uploading => {
                if let Some(session) = state.sessions.get_mut(id) {
                    session.pause_reason = Some(PauseReason::User);
                    session.control.pause();
                }
                self.inner
                    .transition(&mut state, id, UploadStatus::Paused, None);
                info!("Paused upload {}", id);
                Ok(true)
            }
            UploadStatus::Paused => {
                // Drop a resume that has not reached the wire yet
                state.queue.retain(|queued| queued != id);
                if let Some(session) = state.sessions.get_mut(id) {
                    session.pause_reason = Some(PauseReason::User);
                    session.control.pause();
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Resume a paused item once a slot is free
    pub fn resume(&self, id: &str) -> Result<bool, UploadError> {
        self.requeue(id, UploadStatus::Paused)
    }

    /// Retry a failed item once a slot is free, reusing its credentials
    pub fn retry(&self, id: &str) -> Result<bool, UploadError> {
        self.requeue(id, UploadStatus::Failed)
    }

    fn requeue(&self, id: &str, expected: UploadStatus) -> Result<bool, UploadError> {
        {
            let mut state = self.inner.state.lock();
            let status = state
                .items
                .get(id)
                .map(|item| item.status)
                .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

            if status != expected || state.is_queued(id) {
                return Ok(false);
            }
            if let Some(session) = state.sessions.get(id) {
                if session.pause_reason.is_none() {
                    return Ok(false);
                }
            }
            info!("Re-queued upload {} from {:?}", id, status);
            state.queue.push_back(id.to_string());
        }
        self.inner.pump();
        Ok(true)
    }

    /// Permanently remove an item, cancelling its session and releasing its preview
    pub fn remove(&self, id: &str) -> Result<UploadItem, UploadError> {
        let item = {
            let mut state = self.inner.state.lock();
            let item = state
                .items
                .remove(id)
                .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
            if let Some(session) = state.sessions.get(id) {
                session.control.cancel();
            }
            state.queue.retain(|queued| queued != id);
            state.order.retain(|ordered| ordered != id);
            state.credentials.remove(id);
            self.inner.emitter.emit_removed(id, item.preview.clone());
            item
        };

        if let Some(video_id) = &item.remote_video_id {
            self.inner.video_index.remove(video_id);
        }
        self.inner.settled.notify_waiters();
        info!("Removed upload {} ({:?})", id, item.status);
        Ok(item)
    }

    /// Remove every uploaded item; returns how many were purged
    pub fn purge_completed(&self) -> usize {
        let ids: Vec<String> = {
            let state = self.inner.state.lock();
            state
                .order
                .iter()
                .filter(|id| {
                    state
                        .items
                        .get(*id)
                        .is_some_and(|item| item.status == UploadStatus::Uploaded)
                })
                .cloned()
                .collect()
        };
        ids.iter().filter(|id| self.remove(id).is_ok()).count()
    }

    /// Cancel every session and drop all items
    pub fn reset(&self) {
        let ids: Vec<String> = self.inner.state.lock().order.clone();
        for id in &ids {
            let _ = self.remove(id);
        }
        info!("Orchestrator reset ({} items dropped)", ids.len());
    }

    /// Pause every uploading session as one batch
    pub fn pause_all(&self) -> usize {
        self.inner.pause_all(PauseReason::User)
    }

    /// Queue every paused item for resumption
    pub fn resume_all(&self) -> usize {
        self.inner.resume_all()
    }

    /// Network went away: pause everything in flight and stop admitting
    pub fn go_offline(&self) {
        if self.inner.online.swap(false, Ordering::SeqCst) {
            let paused = self.inner.pause_all(PauseReason::Offline);
            info!("Offline: paused {} uploads", paused);
        }
    }

    /// Network is back: resume every paused item and admit again
    pub fn go_online(&self) {
        if !self.inner.online.swap(true, Ordering::SeqCst) {
            let resumed = self.inner.resume_all();
            info!("Online: resuming {} uploads", resumed);
            self.inner.pump();
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Follow `monitor` until it is dropped
    pub fn watch_connectivity(&self, monitor: &ConnectivityMonitor) -> JoinHandle<()> {
        let mut rx = monitor.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let status = *rx.borrow_and_update();
                match status {
                    NetworkStatus::Offline => this.go_offline(),
                    NetworkStatus::Online => this.go_online(),
                }
                if rx.changed().await.is_err() {
                    debug!("Connectivity monitor dropped");
                    break;
                }
            }
        })
    }

    pub fn get(&self, id: &str) -> Option<UploadItem> {
        self.inner.state.lock().items.get(id).cloned()
    }

    /// Snapshot of every item in submission order
    pub fn items(&self) -> Vec<UploadItem> {
        let state = self.inner.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect()
    }

    /// Look an item up by the video id the backend assigned it
    pub fn find_by_video_id(&self, video_id: &str) -> Option<UploadItem> {
        let id = self.inner.video_index.get(video_id)?.value().clone();
        self.get(&id)
    }

    pub fn count_with_status(&self, status: UploadStatus) -> usize {
        self.inner
            .state
            .lock()
            .items
            .values()
            .filter(|item| item.status == status)
            .count()
    }

    /// Sessions currently holding a slot
    pub fn active_count(&self) -> usize {
        self.inner.admission.active_count()
    }

    pub fn max_parallel(&self) -> usize {
        self.inner.admission.max_parallel()
    }

    /// Wait until no item is queued, uploading or processing
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            // Register before checking so a session ending in between is not missed
            settled.as_mut().enable();
            if !self.inner.is_busy() {
                return;
            }
            settled.await;
        }
    }
}

impl Inner {
    fn is_busy(&self) -> bool {
        let state = self.state.lock();
        !state.queue.is_empty()
            || !state.sessions.is_empty()
            || state.items.values().any(|item| {
                matches!(
                    item.status,
                    UploadStatus::Queued | UploadStatus::Uploading | UploadStatus::Processing
                )
            })
    }

    /// Move `id` to `next` if the edge exists; emits the transition
    fn transition(
        &self,
        state: &mut State,
        id: &str,
        next: UploadStatus,
        error: Option<String>,
    ) -> bool {
        let Some(item) = state.items.get_mut(id) else {
            return false;
        };
        if item.status == UploadStatus::Failed && next == UploadStatus::Failed {
            // A retry that failed before sending: refresh the reason
            item.error = error.clone();
            item.updated_at = Utc::now();
            self.emitter.emit_status_changed(id, next, error);
            return true;
        }
        if !item.status.can_transition_to(next) {
            debug!("Ignoring {:?} -> {:?} for {}", item.status, next, id);
            return false;
        }
        debug!("Upload {}: {:?} -> {:?}", id, item.status, next);
        item.status = next;
        item.error = error.clone();
        item.updated_at = Utc::now();
        self.emitter.emit_status_changed(id, next, error);
        true
    }

    /// Admit queued items while slots are free
    fn pump(self: &Arc<Self>) {
        loop {
            if !self.online.load(Ordering::SeqCst) {
                return;
            }
            let Some(permit) = self.admission.try_acquire() else {
                return;
            };
            let Some((id, control)) = self.state.lock().next_admissible() else {
                return;
            };
            debug!("Admitting upload {}", id);
            tokio::spawn(Arc::clone(self).run_session(id, control, permit));
        }
    }

    async fn run_session(
        self: Arc<Self>,
        id: String,
        control: Arc<TransferControl>,
        permit: SlotPermit,
    ) {
        self.drive(&id, &control).await;
        self.state.lock().sessions.remove(&id);
        drop(permit);
        self.pump();
        self.settled.notify_waiters();
    }

    /// Handshake (if needed), transfer, then settle the item's status
    async fn drive(&self, id: &str, control: &Arc<TransferControl>) {
        let snapshot = {
            let state = self.state.lock();
            state
                .items
                .get(id)
                .cloned()
                .map(|item| (item, state.credentials.get(id).cloned()))
        };
        let Some((item, credentials)) = snapshot else {
            return;
        };

        let credentials = match credentials {
            Some(credentials) => {
                debug!("Reusing handshake credentials for {}", id);
                credentials
            }
            // Runs to completion: a record the backend created is either bound
            // or closed. A pending pause is seen by the session's first check.
            None => match self.handshake.create_record(&item).await {
                Ok(credentials) => {
                    if !self.bind_credentials(id, &credentials) {
                        info!(
                            "Upload {} removed during handshake, closing video {}",
                            id, credentials.video_id
                        );
                        self.notifier.notify_failure(&credentials.video_id).await;
                        return;
                    }
                    credentials
                }
                Err(e) => {
                    // Nothing reached the backend's upload target; no finalize
                    let mut state = self.state.lock();
                    self.transition(&mut state, id, UploadStatus::Failed, Some(e.to_string()));
                    return;
                }
            },
        };

        let session = TransferSession::new(
            &item,
            credentials.clone(),
            control.clone(),
            self.target.clone(),
            self.options.retry.clone(),
            self.options.chunk_size,
        );

        match session.run(self).await {
            SessionOutcome::Completed => self.complete(id, &credentials.video_id).await,
            SessionOutcome::Paused { started } => self.settle_paused(id, started),
            SessionOutcome::Cancelled => {}
            SessionOutcome::Failed(e) => self.fail(id, &credentials.video_id, e).await,
        }
    }

    /// Attach handshake credentials to `id`; false if the item is gone
    fn bind_credentials(&self, id: &str, credentials: &HandshakeResult) -> bool {
        let mut state = self.state.lock();
        let Some(item) = state.items.get_mut(id) else {
            return false;
        };
        item.remote_video_id = Some(credentials.video_id.clone());
        self.video_index
            .insert(credentials.video_id.clone(), id.to_string());
        state.credentials.insert(id.to_string(), credentials.clone());
        true
    }

    async fn complete(&self, id: &str, video_id: &str) {
        {
            let mut state = self.state.lock();
            if !self.transition(&mut state, id, UploadStatus::Processing, None) {
                // Paused or removed after the last chunk; a resume will find the full offset
                return;
            }
        }

        self.notifier.notify_success(video_id).await;

        let mut state = self.state.lock();
        if self.transition(&mut state, id, UploadStatus::Uploaded, None) {
            info!("Upload {} complete (video {})", id, video_id);
        }
    }

    async fn fail(&self, id: &str, video_id: &str, error: UploadError) {
        if !self.state.lock().items.contains_key(id) {
            return;
        }

        self.notifier.notify_failure(video_id).await;

        let mut state = self.state.lock();
        if self.transition(&mut state, id, UploadStatus::Failed, Some(error.to_string())) {
            warn!("Upload {} failed: {}", id, error);
        }
    }

    /// A session stopped on a pause signal
    fn settle_paused(&self, id: &str, started: bool) {
        let mut state = self.state.lock();
        let reason = state.sessions.get(id).and_then(|s| s.pause_reason);

        if started {
            // pause()/pause_all() normally moved the status already
            self.transition(&mut state, id, UploadStatus::Paused, None);
            return;
        }

        // Interrupted before any byte moved. A still-queued item has no other
        // path back into the queue; an offline pause keeps its place too.
        let still_queued = state
            .items
            .get(id)
            .is_some_and(|item| item.status == UploadStatus::Queued);
        if (still_queued || reason == Some(PauseReason::Offline)) && !state.is_queued(id) {
            debug!("Upload {} interrupted before start, re-queued", id);
            state.queue.push_front(id.to_string());
        }
    }

    /// Signal live sessions to pause.
    ///
    /// Offline stops every session, handshakes included. A user pause only
    /// touches items that can be paused by hand (uploading, or paused with a
    /// resume still winding up); queued items keep going.
    fn pause_all(&self, reason: PauseReason) -> usize {
        let mut state = self.state.lock();
        let ids: Vec<String> = state.sessions.keys().cloned().collect();
        let mut paused = 0;

        for id in ids {
            let status = state.items.get(&id).map(|item| item.status);
            let pausable = matches!(
                status,
                Some(UploadStatus::Uploading) | Some(UploadStatus::Paused)
            );
            if reason == PauseReason::User && !pausable {
                continue;
            }
            if let Some(session) = state.sessions.get_mut(&id) {
                session.pause_reason = Some(reason);
                session.control.pause();
            }
            if self.transition(&mut state, &id, UploadStatus::Paused, None) {
                paused += 1;
            }
        }

        if reason == PauseReason::User {
            // Drop resumes that have not reached the wire yet
            let State { items, queue, .. } = &mut *state;
            queue.retain(|id| {
                !items
                    .get(id)
                    .is_some_and(|item| item.status == UploadStatus::Paused)
            });
        }
        paused
    }

    fn resume_all(&self) -> usize {
        let mut state = self.state.lock();
        let paused: Vec<String> = state
            .order
            .iter()
            .filter(|id| {
                state
                    .items
                    .get(*id)
                    .is_some_and(|item| item.status == UploadStatus::Paused)
            })
            .cloned()
            .collect();

        let mut resumed = 0;
        for id in paused {
            if !state.is_queued(&id) {
                state.queue.push_back(id);
                resumed += 1;
            }
        }
        resumed
    }
}

impl SessionHooks for Inner {
    fn on_start(&self, item_id: &str, offset: u64) -> bool {
        let mut state = self.state.lock();
        let Some(item) = state.items.get_mut(item_id) else {
            return false;
        };
        let total_size = item.total_size;
        if !item.status.can_transition_to(UploadStatus::Uploading) {
            return false;
        }
        // Set before the transition so uploadedSize never drops while uploading
        item.uploaded_size = offset;
        self.transition(&mut state, item_id, UploadStatus::Uploading, None);
        self.emitter.emit_progress(item_id, offset, total_size);
        true
    }

    fn on_progress(&self, item_id: &str, acknowledged: u64) {
        let mut state = self.state.lock();
        let Some(item) = state.items.get_mut(item_id) else {
            return;
        };
        if item.status != UploadStatus::Uploading || acknowledged <= item.uploaded_size {
            return;
        }
        item.uploaded_size = acknowledged;
        item.updated_at = Utc::now();
        self.emitter
            .emit_progress(item_id, acknowledged, item.total_size);
    }
}

/// Check picker metadata against the file on disk
async fn validate(file: &NewUpload) -> Result<(), UploadError> {
    if file.name.trim().is_empty() {
        return Err(UploadError::Validation("empty file name".to_string()));
    }

    let metadata = tokio::fs::metadata(&file.path).await.map_err(|e| {
        UploadError::Validation(format!("cannot read {}: {}", file.path.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(UploadError::Validation(format!(
            "{} is not a regular file",
            file.path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(UploadError::Validation(format!("{} is empty", file.name)));
    }
    if metadata.len() != file.size {
        return Err(UploadError::Validation(format!(
            "{} is {} bytes on disk, {} declared",
            file.name,
            metadata.len(),
            file.size
        )));
    }
    Ok(())
}
