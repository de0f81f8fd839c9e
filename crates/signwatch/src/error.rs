//! Error types for signwatch

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Signwatch error type
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("SignTools executable not found (searched {} locations)", .searched.len())]
    ExecutableMissing { searched: Vec<String> },

    #[error("Signing timed out after {}s", .0.as_secs())]
    InvocationTimeout(Duration),

    #[error("Failed to run signer: {0}")]
    InvocationUnexpected(String),

    #[error("Failed to move {} to {}: {source}", .path.display(), .dest.display())]
    MoveFailure {
        path: PathBuf,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WatchError>;
