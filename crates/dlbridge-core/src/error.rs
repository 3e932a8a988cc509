//! Error types for dlbridge core

use thiserror::Error;

/// Errors that can occur in dlbridge core
#[derive(Debug, Error)]
pub enum DlbridgeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Torrent not found: {0}")]
    NotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("The download was cancelled")]
    Cancelled,

    #[error("Download has already been started")]
    AlreadyStarted,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Timeout after {0} ms without data")]
    Timeout(u64),

    #[error("Connection closed after {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DlbridgeError {
    /// Check if a failed byte range should be requested again
    pub fn is_retryable(&self) -> bool {
        match self {
            DlbridgeError::Network(_)
            | DlbridgeError::Timeout(_)
            | DlbridgeError::Incomplete { .. } => true,
            DlbridgeError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<DlbridgeError> for String {
    fn from(error: DlbridgeError) -> Self {
        error.to_string()
    }
}
