//! Uploader config file
//!
//! Lives at `~/.videoup/config.json` (`%APPDATA%\Videoup\config.json` on
//! Windows). Loading layers the `VIDEOUP_*` environment over the file and
//! clamps every limit, so callers always see the effective configuration.
//! Saving writes the clamped form only.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use super::types::{UploaderConfig, CONFIG_VERSION};

const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("No home or config directory for the uploader config")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Where the config file lives when no path is given
pub fn default_config_path() -> Result<PathBuf, StorageError> {
    let dir = if cfg!(windows) {
        dirs::config_dir().map(|dir| dir.join("Videoup"))
    } else {
        dirs::home_dir().map(|home| home.join(".videoup"))
    };
    dir.map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(StorageError::NoConfigDir)
}

pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(default_config_path()?))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective configuration: file (or defaults), then environment, then clamping
    pub async fn load(&self) -> Result<UploaderConfig, StorageError> {
        self.load_with(|key| std::env::var(key).ok()).await
    }

    async fn load_with<F>(&self, env: F) -> Result<UploaderConfig, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.read_file().await?.unwrap_or_default();
        config.apply_overrides(env);
        Ok(config.normalized())
    }

    /// File contents as written; `None` if there is no usable file.
    ///
    /// An unparsable file is moved to `config.json.corrupt` so the next save
    /// does not destroy it.
    async fn read_file(&self) -> Result<Option<UploaderConfig>, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<UploaderConfig>(&contents) {
            Ok(config) if config.version > CONFIG_VERSION => Err(StorageError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            }),
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                let aside = self.path.with_extension("json.corrupt");
                warn!(
                    "Unreadable config {:?} ({}), moved to {:?}; using defaults",
                    self.path, e, aside
                );
                fs::rename(&self.path, &aside).await?;
                Ok(None)
            }
        }
    }

    /// Write the clamped form of `config`, replacing the file in one rename
    pub async fn save(&self, config: &UploaderConfig) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let normalized = UploaderConfig {
            version: CONFIG_VERSION,
            ..config.clone().normalized()
        };
        let staged = self.path.with_extension("json.tmp");
        fs::write(&staged, serde_json::to_vec_pretty(&normalized)?).await?;
        fs::rename(&staged, &self.path).await?;

        info!("Saved uploader config to {:?}", self.path);
        Ok(())
    }
}
