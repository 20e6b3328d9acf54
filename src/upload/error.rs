//! Upload Error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Finalize failed: {0}")]
    Finalize(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Upload paused")]
    Paused,

    #[error("Upload not found: {0}")]
    NotFound(String),
}

impl UploadError {
    /// Map a non-success HTTP status from the upload target into a transfer error
    pub fn from_status(context: &str, status: reqwest::StatusCode) -> Self {
        UploadError::Transfer(format!("{} returned HTTP {}", context, status))
    }
}

// Errors travel to subscribers as plain strings
impl serde::Serialize for UploadError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
