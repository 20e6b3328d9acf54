//! Configuration types

use serde::{Deserialize, Serialize};

use crate::upload::retry::{RetryConfig, DEFAULT_RETRY_DELAYS_SECS};
use crate::upload::transfer::MAX_POSSIBLE_PARALLEL;
use crate::upload::types::{DEFAULT_CHUNK_SIZE, MAX_PARALLEL};
use crate::upload::OrchestratorOptions;

/// Current config file version
pub const CONFIG_VERSION: u32 = 1;

/// Smallest chunk size accepted from the config file (256 KiB)
pub const MIN_CHUNK_SIZE: usize = 256 * 1024;

/// Uploader configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploaderConfig {
    pub version: u32,
    /// Backend base URL (`create-record`, `finalize` live under it)
    pub api_base_url: String,
    /// Bearer token for the backend, if it requires one
    pub api_token: Option<String>,
    /// Target grouping for created video records
    pub group_id: String,
    pub max_parallel: usize,
    pub chunk_size: usize,
    pub retry_delays_secs: Vec<u64>,
    pub request_timeout_secs: u64,
    /// Reachability probe interval; 0 disables the probe
    pub probe_interval_secs: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            api_base_url: "http://localhost:8080/api/videos".to_string(),
            api_token: None,
            group_id: String::new(),
            max_parallel: MAX_PARALLEL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_delays_secs: DEFAULT_RETRY_DELAYS_SECS.to_vec(),
            request_timeout_secs: 120,
            probe_interval_secs: 15,
        }
    }
}

impl UploaderConfig {
    /// Defaults with the environment applied, for when no file can be used
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config.normalized()
    }

    /// Apply `VIDEOUP_API_URL`, `VIDEOUP_API_TOKEN` and `VIDEOUP_GROUP_ID`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VIDEOUP_API_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = lookup("VIDEOUP_API_TOKEN") {
            self.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(group) = lookup("VIDEOUP_GROUP_ID") {
            self.group_id = group;
        }
    }

    /// Clamp limits into the ranges the orchestrator accepts
    pub fn normalized(mut self) -> Self {
        self.max_parallel = self.effective_max_parallel();
        self.chunk_size = self.effective_chunk_size();
        if self.retry_delays_secs.is_empty() {
            self.retry_delays_secs = DEFAULT_RETRY_DELAYS_SECS.to_vec();
        }
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self
    }

    pub fn effective_max_parallel(&self) -> usize {
        self.max_parallel.clamp(1, MAX_POSSIBLE_PARALLEL)
    }

    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(MIN_CHUNK_SIZE)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from_secs(&self.retry_delays_secs)
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_parallel: self.effective_max_parallel(),
            chunk_size: self.effective_chunk_size(),
            retry: self.retry_config(),
            group_id: self.group_id.clone(),
        }
    }

    /// `host:port` of the backend, for the reachability probe
    pub fn probe_address(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.api_base_url).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }
}
