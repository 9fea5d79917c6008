use std::path::PathBuf;
use thiserror::Error;

/// Session recorder error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to create session directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No session directory to flush")]
    NoSession,

    #[error("Flush task failed: {0}")]
    FlushTask(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failures reported by the motion, camera and location collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Capture returned no data")]
    NoData,
}

impl SessionError {
    /// Map a poisoned lock into an internal error instead of panicking
    pub(crate) fn lock(what: &str) -> Self {
        SessionError::Internal(format!("Failed to acquire {} lock", what))
    }
}
