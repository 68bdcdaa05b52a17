use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by mutavox-core.
#[derive(Debug, Error)]
pub enum MutavoxError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("supervisor is already running")]
    AlreadyRunning,

    #[error("download failed: {0}")]
    Download(String),

    #[error("downloaded file failed verification: {path} (got {actual}, expected {expected})")]
    DownloadVerification {
        path: PathBuf,
        actual: String,
        expected: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MutavoxError>;
