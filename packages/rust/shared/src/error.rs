//! Error types for the AI visibility workspace.
//!
//! Library crates use [`AivisError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all assessment operations.
#[derive(Debug, thiserror::Error)]
pub enum AivisError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP failure (connect, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// An external call exceeded its time budget.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The answer engine answered with a non-success status.
    #[error("upstream error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    /// Response body could not be decoded or was missing required fields.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A required record does not exist.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The answer engine failed its connectivity self-test.
    #[error("answer engine unavailable: {0}")]
    Unavailable(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, empty question set, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AivisError>;

impl AivisError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error naming the missing resource.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry of the same answer-engine call may succeed.
    ///
    /// Rate limits, server-side failures, timeouts and malformed bodies are
    /// transient; auth and request errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::Parse { .. } => true,
            Self::Upstream { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }
}
