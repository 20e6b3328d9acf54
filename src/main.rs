//! Videoup command line: upload video files with the configured backend.
//!
//! Usage: `videoup <file>...`

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use videoup_lib::config::{ConfigStorage, UploaderConfig};
use videoup_lib::upload::{
    ConnectivityMonitor, HttpBackend, HttpUploadTarget, NewUpload, Orchestrator, UploadEvent,
    UploadStatus,
};

async fn load_config() -> UploaderConfig {
    let storage = match ConfigStorage::new() {
        Ok(storage) => storage,
        Err(e) => {
            warn!("{}, using defaults", e);
            return UploaderConfig::from_env();
        }
    };
    match storage.load().await {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config from {:?}: {}", storage.path(), e);
            UploaderConfig::from_env()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    videoup_lib::init_logging();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: videoup <file>...");
        return ExitCode::from(2);
    }

    let config = load_config().await;
    let timeout = Duration::from_secs(config.request_timeout_secs.max(1));

    let backend = match HttpBackend::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
        timeout,
    ) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("Failed to create backend client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let target = match HttpUploadTarget::new(timeout) {
        Ok(target) => Arc::new(target),
        Err(e) => {
            error!("Failed to create upload client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = Orchestrator::new(backend, target, config.orchestrator_options());

    let monitor = Arc::new(ConnectivityMonitor::new());
    let _connectivity = orchestrator.watch_connectivity(&monitor);
    if config.probe_interval_secs > 0 {
        if let Some(addr) = config.probe_address() {
            monitor.spawn_reachability_probe(addr, Duration::from_secs(config.probe_interval_secs));
        }
    }

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                UploadEvent::Progress {
                    id,
                    uploaded_size,
                    total_size,
                } => info!("{}: {}/{} bytes", id, uploaded_size, total_size),
                UploadEvent::StatusChanged { id, status, error } => match error {
                    Some(error) => warn!("{}: {:?} ({})", id, status, error),
                    None => info!("{}: {:?}", id, status),
                },
                UploadEvent::Removed { id, .. } => info!("{}: removed", id),
            }
        }
    });

    let mut files = Vec::with_capacity(paths.len());
    let mut unreadable = 0usize;
    for path in &paths {
        match NewUpload::from_path(path).await {
            Ok(file) => files.push(file),
            Err(e) => {
                error!("Cannot read {}: {}", path, e);
                unreadable += 1;
            }
        }
    }

    let report = orchestrator.submit(files).await;
    for (name, e) in &report.rejected {
        error!("{} rejected: {}", name, e);
    }

    orchestrator.wait_idle().await;

    let items = orchestrator.items();
    let uploaded = items
        .iter()
        .filter(|item| item.status == UploadStatus::Uploaded)
        .count();
    info!("{} of {} files uploaded", uploaded, paths.len());

    // Unreadable, rejected and duplicate paths all count against success
    if unreadable == 0 && uploaded == paths.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
