//! Error types for the Latchkey daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] latchkey_core::CoreError),

    /// PIN setup or verification error
    #[error("Authentication error: {0}")]
    Auth(#[from] latchkey_core::AuthError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(String),

    /// Activity query failed; the next poll tries again
    #[error("Activity query failed: {0}")]
    Query(String),

    /// Usage access has not been granted to the daemon
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}

