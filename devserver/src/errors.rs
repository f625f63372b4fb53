//! Error types for the devserver client

use thiserror::Error;

/// Main error type for devserver operations
#[derive(Error, Debug)]
pub enum DevServerError {
    /// Network-level failure: timeout, refused connection, DNS, failed ssh.
    #[error("Transient connection error: {0}")]
    TransientConnection(String),

    /// The devserver (or the proxy in front of it) reported overload.
    #[error("Devserver overloaded: {0}")]
    Overload(String),

    /// The devserver returned a non-success result.
    #[error("{0}")]
    Server(String),

    /// Selection ran out of candidates.
    #[error("All devservers are currently down: {tried:?}. dut hostname: {}", hostname.as_deref().unwrap_or("None"))]
    NoHealthyDevServer {
        tried: Vec<String>,
        hostname: Option<String>,
    },

    /// A bounded wait exceeded its budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl DevServerError {
    /// Whether the generic call-level retry loop may re-send the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DevServerError::TransientConnection(_) | DevServerError::Overload(_)
        )
    }

    /// Whether this error is a bounded wait running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DevServerError::Timeout(_))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DevServerError>;
