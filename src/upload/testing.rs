//! In-memory backend and upload target for tests

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::error::UploadError;
use super::handshake::VideoBackend;
use super::target::{TransferMetadata, UploadTarget};
use super::types::{FinalizeStatus, HandshakeResult};

/// Write `contents` to `dir/name` and return the path
pub fn write_video(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Poll `condition` until it holds, panicking after `limit`
pub async fn wait_until<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within {:?}", limit);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
pub struct FakeBackend {
    next_id: AtomicUsize,
    records: Mutex<Vec<(String, String, String)>>,
    rejected: Mutex<HashSet<String>>,
    finalize_calls: Mutex<Vec<(String, FinalizeStatus)>>,
    finalize_fails: AtomicBool,
    gate: Option<Semaphore>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every create-record call waits for [`FakeBackend::release_handshakes`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release_handshakes(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Reject create-record for this file name
    pub fn reject_handshake(&self, file_name: &str) {
        self.rejected.lock().insert(file_name.to_string());
    }

    pub fn fail_finalize(&self, fail: bool) {
        self.finalize_fails.store(fail, Ordering::SeqCst);
    }

    /// (name, group id, file name) per create-record call
    pub fn records(&self) -> Vec<(String, String, String)> {
        self.records.lock().clone()
    }

    pub fn finalize_calls(&self) -> Vec<(String, FinalizeStatus)> {
        self.finalize_calls.lock().clone()
    }
}

#[async_trait]
impl VideoBackend for FakeBackend {
    async fn create_record(
        &self,
        name: &str,
        group_id: &str,
        file_name: &str,
    ) -> Result<HandshakeResult, UploadError> {
        self.records
            .lock()
            .push((name.to_string(), group_id.to_string(), file_name.to_string()));

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| UploadError::Handshake("gate closed".to_string()))?
                .forget();
        }

        if self.rejected.lock().contains(file_name) {
            return Err(UploadError::Handshake(format!("{} rejected", file_name)));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(HandshakeResult {
            client_id: format!("client-{}", n),
            video_id: format!("video-{}", n),
            hostname: "upload.test".to_string(),
            token: format!("token-{}", n),
        })
    }

    async fn finalize(&self, video_id: &str, status: FinalizeStatus) -> Result<(), UploadError> {
        self.finalize_calls
            .lock()
            .push((video_id.to_string(), status));
        if self.finalize_fails.load(Ordering::SeqCst) {
            return Err(UploadError::Finalize("backend unavailable".to_string()));
        }
        Ok(())
    }
}

/// Upload target keeping committed bytes per fingerprint
#[derive(Default)]
pub struct FakeTarget {
    uploads: Mutex<HashMap<String, Vec<u8>>>,
    chunks: Mutex<Vec<(String, u64)>>,
    credentials_seen: Mutex<Vec<(String, String)>>,
    gate: Option<Semaphore>,
    fail_next: AtomicUsize,
    fail_all: AtomicBool,
    send_calls: AtomicUsize,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every chunk waits for a permit handed out by [`FakeTarget::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self, chunks: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(chunks);
        }
    }

    /// Pretend an earlier session already committed `bytes`
    pub fn preload(&self, fingerprint: &str, bytes: &[u8]) {
        self.uploads
            .lock()
            .insert(fingerprint.to_string(), bytes.to_vec());
    }

    /// Drop everything the server knows about this upload
    pub fn forget(&self, fingerprint: &str) {
        self.uploads.lock().remove(fingerprint);
    }

    pub fn fail_next_sends(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_sends(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn committed(&self, fingerprint: &str) -> Option<u64> {
        self.uploads
            .lock()
            .get(fingerprint)
            .map(|data| data.len() as u64)
    }

    pub fn received(&self, fingerprint: &str) -> Vec<u8> {
        self.uploads
            .lock()
            .get(fingerprint)
            .cloned()
            .unwrap_or_default()
    }

    /// Offsets of every accepted chunk for this upload
    pub fn chunk_offsets(&self, fingerprint: &str) -> Vec<u64> {
        self.chunks
            .lock()
            .iter()
            .filter(|(fp, _)| fp == fingerprint)
            .map(|(_, offset)| *offset)
            .collect()
    }

    /// (fingerprint, video id) for every request seen
    pub fn credentials_seen(&self) -> Vec<(String, String)> {
        self.credentials_seen.lock().clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadTarget for FakeTarget {
    async fn discover_offset(
        &self,
        credentials: &HandshakeResult,
        metadata: &TransferMetadata,
    ) -> Result<Option<u64>, UploadError> {
        self.credentials_seen
            .lock()
            .push((metadata.fingerprint.clone(), credentials.video_id.clone()));
        Ok(self.committed(&metadata.fingerprint))
    }

    async fn send_chunk(
        &self,
        credentials: &HandshakeResult,
        metadata: &TransferMetadata,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, UploadError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| UploadError::Transfer("gate closed".to_string()))?
                .forget();
        }

        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen
            .lock()
            .push((metadata.fingerprint.clone(), credentials.video_id.clone()));

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(UploadError::Transfer("connection reset".to_string()));
        }
        let pending_failures = self.fail_next.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_next.store(pending_failures - 1, Ordering::SeqCst);
            return Err(UploadError::Transfer("connection reset".to_string()));
        }

        let mut uploads = self.uploads.lock();
        let data = uploads.entry(metadata.fingerprint.clone()).or_default();
        if offset > data.len() as u64 {
            return Err(UploadError::Transfer(format!(
                "offset {} past committed {}",
                offset,
                data.len()
            )));
        }
        data.truncate(offset as usize);
        data.extend_from_slice(&chunk);
        self.chunks
            .lock()
            .push((metadata.fingerprint.clone(), offset));
        Ok(data.len() as u64)
    }
}
