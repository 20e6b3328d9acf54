//! Videoup - resumable video upload orchestrator
//!
//! Sends large video files to a media-processing backend in resumable
//! chunks, a bounded number at a time, pausing and resuming with the network.

pub mod config;
pub mod upload;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
