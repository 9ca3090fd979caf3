use std::path::PathBuf;

use pricesync_client::ApiError;
use pricesync_core::error::CoreError;

/// Failures reading or writing the persisted state files.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not hold the expected JSON layout.
    #[error("Malformed state file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced by the sync components.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether this error must abort a whole run before anything is committed.
    ///
    /// Remote failures are accumulated per entity instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Api(_))
    }
}
