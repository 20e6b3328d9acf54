//! Configuration Management Module
//!
//! Uploader settings stored as JSON in the user's config directory,
//! with environment overrides for the backend endpoint and credentials.

pub mod storage;
pub mod types;

pub use storage::{default_config_path, ConfigStorage, StorageError};
pub use types::{UploaderConfig, CONFIG_VERSION, MIN_CHUNK_SIZE};
