//! File-backed tracking backend.
//!
//! Runs live under `<store_dir>/<project>/<run id>/`. Each run directory holds
//! a `run.json` manifest ([`RunRecord`]) that is rewritten atomically after
//! every logging call, and an `artifacts/` directory that uploaded files are
//! copied into.

use super::{Session, TrackingClient, artifact_name};
use crate::error::{Result, TrackerError};
use crate::persistence::{atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MANIFEST: &str = "run.json";
const ARTIFACT_DIR: &str = "artifacts";

/// Lifecycle state of a stored run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Closed,
}

/// One point of a numeric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub step: u64,
    pub value: f64,
    pub logged_at: DateTime<Utc>,
}

/// One point of a text series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPoint {
    pub step: u64,
    pub value: String,
    pub logged_at: DateTime<Utc>,
}

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    /// Location relative to the run directory.
    pub stored_path: PathBuf,
    pub source_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    pub logged_at: DateTime<Utc>,
}

/// Persisted form of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub name: String,
    pub project: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Vec<MetricPoint>>,
    #[serde(default)]
    pub texts: BTreeMap<String, Vec<TextPoint>>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunRecord {
    pub fn new(name: &str, project: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            project: project.to_string(),
            state: RunState::Running,
            created_at: now,
            updated_at: now,
            closed_at: None,
            properties: BTreeMap::new(),
            metrics: BTreeMap::new(),
            texts: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    /// Most recent value of a numeric series.
    pub fn last_metric(&self, key: &str) -> Option<f64> {
        self.metrics
            .get(key)
            .and_then(|points| points.last())
            .map(|p| p.value)
    }

    /// Total number of points across all numeric series.
    pub fn metric_point_count(&self) -> usize {
        self.metrics.values().map(Vec::len).sum()
    }
}

/// A run persisted to the local store.
pub struct LocalSession {
    id: String,
    name: String,
    dir: PathBuf,
    record: Mutex<RunRecord>,
}

impl LocalSession {
    fn create(project_dir: &Path, record: RunRecord) -> Result<Self> {
        let dir = project_dir.join(&record.id);
        std::fs::create_dir_all(dir.join(ARTIFACT_DIR))?;
        atomic_write_json(&dir.join(MANIFEST), &record)?;
        Ok(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            dir,
            record: Mutex::new(record),
        })
    }

    /// Directory holding this run's manifest and artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A copy of the current manifest.
    pub fn snapshot(&self) -> RunRecord {
        self.record.lock().unwrap().clone()
    }

    /// Apply `f` to the manifest of a running session and persist the result.
    ///
    /// The in-memory manifest only changes once the new one is on disk.
    fn update<F>(&self, on_error: impl Fn(String) -> TrackerError, f: F) -> Result<()>
    where
        F: FnOnce(&mut RunRecord) -> Result<()>,
    {
        let mut record = self.record.lock().unwrap();
        if record.state != RunState::Running {
            return Err(on_error(format!("run {} is closed", self.id)));
        }
        let mut next = record.clone();
        f(&mut next)?;
        next.updated_at = Utc::now();
        atomic_write_json(&self.dir.join(MANIFEST), &next)
            .map_err(|e| on_error(format!("cannot persist run manifest: {e}")))?;
        *record = next;
        Ok(())
    }
}

impl Session for LocalSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.update(
            |reason| TrackerError::property(key, reason),
            |record| {
                record
                    .properties
                    .insert(key.to_string(), value.to_string());
                Ok(())
            },
        )
    }

    fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        self.update(
            |reason| TrackerError::metric(key, reason),
            |record| {
                // JSON has no representation for NaN or infinities.
                if !value.is_finite() {
                    return Err(TrackerError::metric(
                        key,
                        format!("non-finite value {value} cannot be stored"),
                    ));
                }
                let series = record.metrics.entry(key.to_string()).or_default();
                series.push(MetricPoint {
                    step: series.len() as u64,
                    value,
                    logged_at: Utc::now(),
                });
                Ok(())
            },
        )
    }

    fn log_text(&self, key: &str, value: &str) -> Result<()> {
        self.update(
            |reason| TrackerError::metric(key, reason),
            |record| {
                let series = record.texts.entry(key.to_string()).or_default();
                series.push(TextPoint {
                    step: series.len() as u64,
                    value: value.to_string(),
                    logged_at: Utc::now(),
                });
                Ok(())
            },
        )
    }

    fn log_artifact(&self, path: &Path, remote_name: Option<&str>) -> Result<()> {
        let name = artifact_name(path, remote_name);
        let dir = self.dir.clone();
        self.update(
            |reason| TrackerError::artifact(&name, reason),
            |record| {
                let bytes = std::fs::read(path).map_err(|e| {
                    TrackerError::artifact(&name, format!("cannot read {}: {e}", path.display()))
                })?;
                let stored_path = Path::new(ARTIFACT_DIR).join(name.replace(['/', '\\'], "_"));
                std::fs::write(dir.join(&stored_path), &bytes)
                    .map_err(|e| TrackerError::artifact(&name, e.to_string()))?;

                let mut hasher = Sha256::new();
                hasher.update(&bytes);

                // Re-uploading a name replaces the previous entry.
                record.artifacts.retain(|a| a.name != name);
                record.artifacts.push(ArtifactRecord {
                    name: name.clone(),
                    stored_path,
                    source_path: path.to_path_buf(),
                    size_bytes: bytes.len() as u64,
                    sha256: format!("{:x}", hasher.finalize()),
                    logged_at: Utc::now(),
                });
                Ok(())
            },
        )
    }

    fn close(&self) -> Result<()> {
        self.update(|reason| TrackerError::close(reason), |record| {
            record.state = RunState::Closed;
            record.closed_at = Some(Utc::now());
            Ok(())
        })?;
        tracing::debug!(run_id = %self.id, "Run closed");
        Ok(())
    }
}

/// Tracking client over a directory of runs.
pub struct LocalTracker {
    store_dir: PathBuf,
    project: Option<String>,
    current: Mutex<Option<Arc<LocalSession>>>,
}

impl LocalTracker {
    pub fn new(store_dir: impl Into<PathBuf>, project: Option<String>) -> Self {
        Self {
            store_dir: store_dir.into(),
            project,
            current: Mutex::new(None),
        }
    }

    fn project_dir(&self) -> Result<PathBuf> {
        match &self.project {
            Some(project) => Ok(self.store_dir.join(project)),
            None => Err(TrackerError::configuration(
                "no project configured; set `project` in .trackfit/config.toml or TRACKFIT_PROJECT",
            )),
        }
    }

    /// Directory of run `id`. Ids are single path components.
    fn run_dir(&self, id: &str) -> Result<PathBuf> {
        let plain = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && Path::new(id).components().count() == 1;
        if !plain {
            return Err(TrackerError::SessionNotFound(id.to_string()));
        }
        Ok(self.project_dir()?.join(id))
    }

    /// Create a new run and make it the current session.
    pub fn start_session(&self, name: Option<&str>) -> Result<Arc<LocalSession>> {
        let project_dir = self.project_dir()?;
        let project = self.project.as_deref().unwrap_or_default();
        let mut record = RunRecord::new("", project);
        record.name = match name {
            Some(name) => name.to_string(),
            None => format!("run-{}", &record.id[..8]),
        };

        let session = Arc::new(LocalSession::create(&project_dir, record)?);
        tracing::info!(run_id = %session.id, name = %session.name, "Started run");
        *self.current.lock().unwrap() = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Reopen a run that was left running and make it the current session.
    pub fn resume(&self, id: &str) -> Result<Arc<LocalSession>> {
        let record = self.load_run(id)?;
        if record.state == RunState::Closed {
            return Err(TrackerError::no_active_session(format!(
                "run {id} is closed and cannot be resumed"
            )));
        }
        let session = Arc::new(LocalSession {
            id: record.id.clone(),
            name: record.name.clone(),
            dir: self.run_dir(&record.id)?,
            record: Mutex::new(record),
        });
        tracing::info!(run_id = %session.id, "Resumed run");
        *self.current.lock().unwrap() = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Load a stored run by id.
    pub fn load_run(&self, id: &str) -> Result<RunRecord> {
        let path = self.run_dir(id)?.join(MANIFEST);
        load_json(&path)?.ok_or_else(|| TrackerError::SessionNotFound(id.to_string()))
    }

    /// All stored runs for the project, oldest first.
    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let project_dir = self.project_dir()?;
        if !project_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&project_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match load_json::<RunRecord>(&entry.path().join(MANIFEST)) {
                Ok(Some(record)) => runs.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable run")
                }
            }
        }
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }
}

impl TrackingClient for LocalTracker {
    fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    fn current_session(&self) -> Result<Arc<dyn Session>> {
        match self.current.lock().unwrap().as_ref() {
            Some(session) => Ok(Arc::clone(session) as Arc<dyn Session>),
            None => Err(TrackerError::no_active_session(
                "call `start_session` or `resume` before fitting",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> LocalTracker {
        LocalTracker::new(dir.path(), Some("team/vision".to_string()))
    }

    #[test]
    fn test_start_session_writes_manifest() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(Some("baseline")).unwrap();

        assert!(session.dir().join(MANIFEST).exists());
        assert!(session.dir().join(ARTIFACT_DIR).is_dir());
        let record = tracker.load_run(session.id()).unwrap();
        assert_eq!(record.name, "baseline");
        assert_eq!(record.project, "team/vision");
        assert_eq!(record.state, RunState::Running);
    }

    #[test]
    fn test_generated_name() {
        let dir = TempDir::new().unwrap();
        let session = tracker(&dir).start_session(None).unwrap();
        assert!(session.name().starts_with("run-"));
        assert_eq!(session.name().len(), "run-".len() + 8);
    }

    #[test]
    fn test_metric_steps_increment_per_key() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(None).unwrap();
        session.log_metric("batch__loss", 0.9).unwrap();
        session.log_metric("batch__loss", 0.7).unwrap();
        session.log_metric("batch__lr", 0.01).unwrap();

        let record = tracker.load_run(session.id()).unwrap();
        let steps: Vec<u64> = record.metrics["batch__loss"].iter().map(|p| p.step).collect();
        assert_eq!(steps, vec![0, 1]);
        assert_eq!(record.last_metric("batch__loss"), Some(0.7));
        assert_eq!(record.metric_point_count(), 3);
    }

    #[test]
    fn test_non_finite_metric_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(None).unwrap();
        session.log_metric("batch__loss", 0.5).unwrap();

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                session.log_metric("batch__loss", value),
                Err(TrackerError::MetricLog { .. })
            ));
        }

        let record = tracker.load_run(session.id()).unwrap();
        assert_eq!(record.metrics["batch__loss"].len(), 1);
        assert_eq!(tracker.list_runs().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_persist_leaves_session_unchanged() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(None).unwrap();
        let manifest = session.dir().join(MANIFEST);

        // A directory in place of the manifest makes the rename fail.
        std::fs::remove_file(&manifest).unwrap();
        std::fs::create_dir(&manifest).unwrap();
        assert!(matches!(
            session.close(),
            Err(TrackerError::SessionClose { .. })
        ));
        assert!(matches!(
            session.log_metric("x", 1.0),
            Err(TrackerError::MetricLog { .. })
        ));
        let record = session.snapshot();
        assert_eq!(record.state, RunState::Running);
        assert!(record.closed_at.is_none());
        assert!(record.metrics.is_empty());

        std::fs::remove_dir(&manifest).unwrap();
        session.log_metric("x", 1.0).unwrap();
        session.close().unwrap();
        let record = tracker.load_run(session.id()).unwrap();
        assert_eq!(record.state, RunState::Closed);
        assert_eq!(record.metrics["x"].len(), 1);
    }

    #[test]
    fn test_run_ids_stay_inside_project() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(None).unwrap();
        let escaped = format!("../vision/{}", session.id());

        for id in [escaped.as_str(), "..", ".", "", "a/b", "a\\b"] {
            assert!(matches!(
                tracker.load_run(id),
                Err(TrackerError::SessionNotFound(_))
            ));
            assert!(tracker.resume(id).is_err());
        }
        assert!(tracker.load_run(session.id()).is_ok());
    }

    #[test]
    fn test_artifact_is_copied_and_hashed() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(None).unwrap();

        let src = dir.path().join("summary.txt");
        std::fs::write(&src, "Linear(4 -> 2)").unwrap();
        session
            .log_artifact(&src, Some("model_summary.txt"))
            .unwrap();

        let record = session.snapshot();
        assert_eq!(record.artifacts.len(), 1);
        let artifact = &record.artifacts[0];
        assert_eq!(artifact.name, "model_summary.txt");
        assert_eq!(artifact.size_bytes, 14);
        assert_eq!(artifact.sha256.len(), 64);
        let stored = std::fs::read_to_string(session.dir().join(&artifact.stored_path)).unwrap();
        assert_eq!(stored, "Linear(4 -> 2)");
    }

    #[test]
    fn test_closed_run_refuses_logging() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(None).unwrap();
        session.close().unwrap();

        assert!(matches!(
            session.log_metric("x", 1.0),
            Err(TrackerError::MetricLog { .. })
        ));
        assert!(matches!(
            session.close(),
            Err(TrackerError::SessionClose { .. })
        ));
        let record = tracker.load_run(session.id()).unwrap();
        assert_eq!(record.state, RunState::Closed);
        assert!(record.closed_at.is_some());
    }

    #[test]
    fn test_resume_running_run() {
        let dir = TempDir::new().unwrap();
        let id = {
            let tracker = tracker(&dir);
            let session = tracker.start_session(None).unwrap();
            session.log_metric("epoch__train_loss", 0.4).unwrap();
            session.id().to_string()
        };

        let tracker = tracker(&dir);
        let resumed = tracker.resume(&id).unwrap();
        resumed.log_metric("epoch__train_loss", 0.3).unwrap();
        assert_eq!(tracker.current_session().unwrap().id(), id);

        let record = tracker.load_run(&id).unwrap();
        assert_eq!(record.metrics["epoch__train_loss"].len(), 2);
    }

    #[test]
    fn test_resume_closed_run_fails() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        let session = tracker.start_session(None).unwrap();
        session.close().unwrap();
        assert!(tracker.resume(session.id()).is_err());
        assert!(matches!(
            tracker.resume("missing"),
            Err(TrackerError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_list_runs() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(&dir);
        assert!(tracker.list_runs().unwrap().is_empty());
        tracker.start_session(Some("a")).unwrap();
        tracker.start_session(Some("b")).unwrap();
        let names: Vec<String> = tracker.list_runs().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_string()));
    }

    #[test]
    fn test_no_project() {
        let dir = TempDir::new().unwrap();
        let tracker = LocalTracker::new(dir.path(), None);
        assert!(tracker.project().is_none());
        assert!(matches!(
            tracker.start_session(None),
            Err(TrackerError::Configuration(_))
        ));
    }
}
