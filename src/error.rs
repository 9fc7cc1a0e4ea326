// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    /// Credentials or auth endpoint could not be resolved; prior settings are kept.
    #[error("Configuration resolution failed: {0}")]
    ConfigResolution(String),

    #[error("Failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to persist cache file {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{watcher}] consumer rejected the fetched content")]
    ConsumerRejected { watcher: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl WatcherError {
    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        WatcherError::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WatcherError>;
