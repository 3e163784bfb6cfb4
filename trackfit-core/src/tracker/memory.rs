//! In-memory tracking backend for testing.
//!
//! Every call against a [`MemorySession`] is recorded as a [`SessionEvent`] in
//! call order. Individual call kinds can be made to fail to exercise the
//! callback's error handling.

use super::{Session, TrackingClient, artifact_name};
use crate::error::{Result, TrackerError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One recorded call against a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Property {
        key: String,
        value: String,
    },
    Metric {
        key: String,
        value: f64,
    },
    Text {
        key: String,
        value: String,
    },
    Artifact {
        name: String,
        path: PathBuf,
        contents: Vec<u8>,
    },
    Closed,
}

#[derive(Debug, Default)]
struct Faults {
    properties: bool,
    metrics: bool,
    artifacts: bool,
    close: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    events: Vec<SessionEvent>,
    closed: bool,
    close_attempts: usize,
}

/// A session that keeps every call in memory.
#[derive(Debug)]
pub struct MemorySession {
    id: String,
    name: String,
    state: Mutex<SessionState>,
    faults: Mutex<Faults>,
}

impl MemorySession {
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            state: Mutex::new(SessionState::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Make every `set_property` call fail.
    pub fn fail_properties(&self) {
        self.faults.lock().unwrap().properties = true;
    }

    /// Make every `log_metric` and `log_text` call fail.
    pub fn fail_metrics(&self) {
        self.faults.lock().unwrap().metrics = true;
    }

    /// Make every `log_artifact` call fail.
    pub fn fail_artifacts(&self) {
        self.faults.lock().unwrap().artifacts = true;
    }

    /// Make `close` fail.
    pub fn fail_close(&self) {
        self.faults.lock().unwrap().close = true;
    }

    /// All recorded events, in call order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Latest value of a property.
    pub fn property(&self, key: &str) -> Option<String> {
        self.events().into_iter().rev().find_map(|e| match e {
            SessionEvent::Property { key: k, value } if k == key => Some(value),
            _ => None,
        })
    }

    /// Values logged to the numeric series `key`.
    pub fn metric_values(&self, key: &str) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Metric { key: k, value } if k == key => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Values logged to the text series `key`.
    pub fn text_values(&self, key: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Text { key: k, value } if k == key => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Number of metric events, across all keys.
    pub fn metric_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Metric { .. }))
            .count()
    }

    /// Uploaded artifacts as `(remote name, contents)`.
    pub fn artifacts(&self) -> Vec<(String, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Artifact { name, contents, .. } => Some((name, contents)),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Number of times `close` was called, successful or not.
    pub fn close_attempts(&self) -> usize {
        self.state.lock().unwrap().close_attempts
    }

    fn record(&self, event: SessionEvent) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TrackerError::no_active_session(format!(
                "session {} is closed",
                self.id
            )));
        }
        state.events.push(event);
        Ok(())
    }
}

impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        if self.faults.lock().unwrap().properties {
            return Err(TrackerError::property(key, "injected failure"));
        }
        self.record(SessionEvent::Property {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        if self.faults.lock().unwrap().metrics {
            return Err(TrackerError::metric(key, "injected failure"));
        }
        self.record(SessionEvent::Metric {
            key: key.to_string(),
            value,
        })
    }

    fn log_text(&self, key: &str, value: &str) -> Result<()> {
        if self.faults.lock().unwrap().metrics {
            return Err(TrackerError::metric(key, "injected failure"));
        }
        self.record(SessionEvent::Text {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn log_artifact(&self, path: &Path, remote_name: Option<&str>) -> Result<()> {
        let name = artifact_name(path, remote_name);
        if self.faults.lock().unwrap().artifacts {
            return Err(TrackerError::artifact(&name, "injected failure"));
        }
        let contents = std::fs::read(path).map_err(|e| {
            TrackerError::artifact(&name, format!("cannot read {}: {e}", path.display()))
        })?;
        self.record(SessionEvent::Artifact {
            name,
            path: path.to_path_buf(),
            contents,
        })
    }

    fn close(&self) -> Result<()> {
        let fail = self.faults.lock().unwrap().close;
        let mut state = self.state.lock().unwrap();
        state.close_attempts += 1;
        if fail {
            return Err(TrackerError::close("injected failure"));
        }
        if state.closed {
            return Err(TrackerError::close(format!(
                "session {} already closed",
                self.id
            )));
        }
        state.closed = true;
        state.events.push(SessionEvent::Closed);
        Ok(())
    }
}

/// Tracking client backed by [`MemorySession`]s.
pub struct InMemoryTracker {
    project: Option<String>,
    current: Mutex<Option<Arc<MemorySession>>>,
}

impl InMemoryTracker {
    /// Create a tracker with a project context and no session.
    pub fn new(project: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            current: Mutex::new(None),
        }
    }

    /// Create a tracker with no project context.
    pub fn without_project() -> Self {
        Self {
            project: None,
            current: Mutex::new(None),
        }
    }

    /// Start a new session and make it current.
    pub fn start_session(&self, name: &str) -> Arc<MemorySession> {
        let session = Arc::new(MemorySession::new(name));
        *self.current.lock().unwrap() = Some(Arc::clone(&session));
        session
    }

    /// The current session, with its concrete type.
    pub fn session(&self) -> Option<Arc<MemorySession>> {
        self.current.lock().unwrap().clone()
    }
}

impl TrackingClient for InMemoryTracker {
    fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    fn current_session(&self) -> Result<Arc<dyn Session>> {
        match self.current.lock().unwrap().as_ref() {
            Some(session) => Ok(Arc::clone(session) as Arc<dyn Session>),
            None => Err(TrackerError::no_active_session(
                "start a session before fitting",
            )),
        }
    }
}
