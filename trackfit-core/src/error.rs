//! Error types for the trackfit core library.
//!
//! Uses `thiserror` with one enum covering configuration, session, logging and
//! fit-driver failures. Which of these are fatal depends on the hook that hits
//! them; see [`crate::tracking::TrackerCallback`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Top-level error type for tracking operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No active session: {0}")]
    NoActiveSession(String),

    #[error("Failed to set property '{key}': {reason}")]
    PropertyLog { key: String, reason: String },

    #[error("Failed to log metric '{key}': {reason}")]
    MetricLog { key: String, reason: String },

    #[error("Failed to log artifact '{name}': {reason}")]
    ArtifactLog { name: String, reason: String },

    #[error("Failed to close session: {reason}")]
    SessionClose { reason: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid metric '{key}': {reason}")]
    InvalidMetric { key: String, reason: String },

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn no_active_session(msg: impl Into<String>) -> Self {
        Self::NoActiveSession(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn property(key: &str, reason: impl Into<String>) -> Self {
        Self::PropertyLog {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn metric(key: &str, reason: impl Into<String>) -> Self {
        Self::MetricLog {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn artifact(name: &str, reason: impl Into<String>) -> Self {
        Self::ArtifactLog {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn close(reason: impl Into<String>) -> Self {
        Self::SessionClose {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackerError::property("n_epoch", "session closed");
        assert_eq!(
            err.to_string(),
            "Failed to set property 'n_epoch': session closed"
        );

        let err = TrackerError::configuration("no project");
        assert_eq!(err.to_string(), "Configuration error: no project");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: TrackerError = io.into();
        assert!(matches!(err, TrackerError::Io(_)));
    }
}
