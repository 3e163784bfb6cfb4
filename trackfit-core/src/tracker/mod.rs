//! Tracking client abstraction.
//!
//! A [`TrackingClient`] owns the project context and hands out the current
//! [`Session`]; a session receives properties, metrics, text and artifacts for
//! one training run. Two implementations ship with the crate:
//! - [`LocalTracker`]: persists runs as JSON manifests plus copied artifacts.
//! - [`InMemoryTracker`]: records calls in memory, with fault injection, for tests.

pub mod local;
pub mod memory;

pub use local::{LocalSession, LocalTracker, RunRecord, RunState};
pub use memory::{InMemoryTracker, MemorySession, SessionEvent};

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

/// A tracked training run.
pub trait Session: Send + Sync {
    /// Backend-assigned identifier.
    fn id(&self) -> &str;

    /// Human-readable run name.
    fn name(&self) -> &str;

    /// Set (or overwrite) a string property.
    fn set_property(&self, key: &str, value: &str) -> Result<()>;

    /// Append a value to the numeric series `key`.
    fn log_metric(&self, key: &str, value: f64) -> Result<()>;

    /// Append a value to the text series `key`.
    fn log_text(&self, key: &str, value: &str) -> Result<()>;

    /// Upload a file. `remote_name` defaults to the file name.
    fn log_artifact(&self, path: &Path, remote_name: Option<&str>) -> Result<()>;

    /// Stop the run. Closing a closed session is an error.
    fn close(&self) -> Result<()>;
}

/// Entry point into a tracking backend.
pub trait TrackingClient: Send + Sync {
    /// The configured project, if any.
    fn project(&self) -> Option<&str>;

    /// The session runs should currently log to.
    fn current_session(&self) -> Result<Arc<dyn Session>>;
}

/// Remote name used when `log_artifact` is called without one.
pub(crate) fn artifact_name(path: &Path, remote_name: Option<&str>) -> String {
    match remote_name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name_defaults_to_file_name() {
        let path = Path::new("/runs/models/model_3.pth");
        assert_eq!(artifact_name(path, None), "model_3.pth");
        assert_eq!(
            artifact_name(path, Some("weights.pth")),
            "weights.pth"
        );
    }
}
