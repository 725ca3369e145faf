//! Error types for the adaptive poller.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for poller setup and configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse config at {path}: {reason}")]
    TomlParse { path: PathBuf, reason: String },

    /// IO error while reading configuration or running a command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires a Tokio runtime that is not available.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for poller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a fetch source.
///
/// The poller does not distinguish network, authorization or server
/// errors; it only carries the message through to the observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchFailure {
    message: String,
    timed_out: bool,
}

impl FetchFailure {
    /// Creates a failure with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a failure for a fetch that exceeded its deadline.
    pub fn timed_out(after: std::time::Duration) -> Self {
        Self {
            message: format!("fetch timed out after {}ms", after.as_millis()),
            timed_out: true,
        }
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the fetch was abandoned because of its deadline.
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

impl From<std::io::Error> for FetchFailure {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for FetchFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for FetchFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fetch_failure_displays_message() {
        let failure = FetchFailure::new("backend unavailable");
        assert_eq!(failure.to_string(), "backend unavailable");
        assert_eq!(failure.message(), "backend unavailable");
        assert!(!failure.is_timeout());
    }

    #[test]
    fn timed_out_failure_is_flagged() {
        let failure = FetchFailure::timed_out(Duration::from_millis(1500));
        assert!(failure.is_timeout());
        assert_eq!(failure.message(), "fetch timed out after 1500ms");
    }

    #[test]
    fn config_error_formats_reason() {
        let err = Error::Config("base_interval_ms must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: base_interval_ms must be positive"
        );
    }
}
