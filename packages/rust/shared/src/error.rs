//! Error types for GrandGuru.
//!
//! Library crates use [`GrandGuruError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics, and the API
//! maps it onto HTTP status codes.

use std::path::PathBuf;

/// Top-level error type for all GrandGuru operations.
#[derive(Debug, thiserror::Error)]
pub enum GrandGuruError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during a crawl.
    #[error("network error: {0}")]
    Network(String),

    /// Worker output, HTML, or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Crawl worker process error (spawn, wait, kill).
    #[error("worker error: {0}")]
    Worker(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad request parameters, invalid state transition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// No job is registered under the given identifier.
    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GrandGuruError>;

impl GrandGuruError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = GrandGuruError::config("missing worker program");
        assert_eq!(err.to_string(), "config error: missing worker program");

        let err = GrandGuruError::JobNotFound("abc".into());
        assert_eq!(err.to_string(), "job not found: abc");

        let err = GrandGuruError::validation("depth must be at least 1");
        assert!(err.to_string().contains("depth must be"));
    }
}
