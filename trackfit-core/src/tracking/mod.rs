//! Tracker callback: forwards losses, metrics, hyperparameters, the model
//! summary and checkpoints from a fit to a tracking session.
//!
//! Error policy per hook:
//! - `on_fit_begin`, `on_fit_end` and the checkpoint upload in `on_epoch_end`
//!   guard every call on its own; failures become warnings and the hook
//!   carries on with the next call.
//! - `on_batch_end` and the metric part of `on_epoch_end` return the first
//!   error, which aborts the fit.

pub mod report;

pub use report::{
    CollectingSink, Hook, HookReport, HookWarning, Outcome, TracingSink, WarningKind,
    WarningSink,
};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::tracker::{Session, TrackingClient};
use crate::training::{Callback, LearnerState, RecordValue, checkpoint_path};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Remote name of the uploaded model structure.
pub const MODEL_SUMMARY: &str = "model_summary.txt";

/// Logs a fit to the current session of a [`TrackingClient`].
pub struct TrackerCallback {
    client: Arc<dyn TrackingClient>,
    session: Option<Arc<dyn Session>>,
    log_model_weights: bool,
    keep_session_running: bool,
    sink: Arc<dyn WarningSink>,
    staging_dir: Option<PathBuf>,
}

impl TrackerCallback {
    /// Create a callback logging to `client`.
    ///
    /// Fails with [`TrackerError::Configuration`] when the client has no
    /// project.
    pub fn new(client: Arc<dyn TrackingClient>) -> Result<Self> {
        if client.project().is_none() {
            return Err(TrackerError::configuration(
                "no tracking project initialized; configure a project before creating the callback",
            ));
        }
        Ok(Self {
            client,
            session: None,
            log_model_weights: true,
            keep_session_running: false,
            sink: Arc::new(TracingSink),
            staging_dir: None,
        })
    }

    /// Create a callback with the flags from `config`.
    pub fn from_config(client: Arc<dyn TrackingClient>, config: &TrackerConfig) -> Result<Self> {
        Ok(Self::new(client)?
            .log_model_weights(config.log_model_weights)
            .keep_session_running(config.keep_session_running))
    }

    /// Upload checkpoint files at the end of each epoch (default `true`).
    pub fn log_model_weights(mut self, enabled: bool) -> Self {
        self.log_model_weights = enabled;
        self
    }

    /// Leave the session open when the fit ends (default `false`).
    pub fn keep_session_running(mut self, enabled: bool) -> Self {
        self.keep_session_running = enabled;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn WarningSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Directory the model summary is staged in before upload (system temp
    /// dir by default).
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Session acquired by the last `on_fit_begin`, if it is still held.
    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }

    fn require_session(&self) -> Result<&Arc<dyn Session>> {
        self.session.as_ref().ok_or_else(|| {
            TrackerError::no_active_session("no session was acquired when the fit began")
        })
    }

    /// Record `result` for `operation`, warning on failure.
    fn guard(
        &self,
        report: &mut HookReport,
        operation: &str,
        kind: WarningKind,
        result: Result<()>,
    ) {
        match result {
            Ok(()) => report.succeeded(operation),
            Err(e) => {
                self.sink.warn(&HookWarning {
                    hook: report.hook,
                    kind,
                    message: format!("{operation}: {e}"),
                });
                report.failed(operation, kind, e.to_string());
            }
        }
    }

    /// Acquire the session and record run-level information. Never fails.
    pub fn fit_begin(&mut self, learn: &LearnerState) -> HookReport {
        let mut report = HookReport::new(Hook::FitBegin);

        let acquired = self.client.current_session().map(|session| {
            tracing::info!(session_id = session.id(), name = session.name(), "Tracking fit");
            self.session = Some(session);
        });
        if acquired.is_err() {
            self.session = None;
        }
        self.guard(
            &mut report,
            "acquire_session",
            WarningKind::NoActiveSession,
            acquired,
        );

        let n_epoch = learn.n_epoch.to_string();
        let result = self
            .require_session()
            .and_then(|s| s.set_property("n_epoch", &n_epoch));
        self.guard(
            &mut report,
            "set_property:n_epoch",
            WarningKind::PropertyLog,
            result,
        );

        let model_class = learn.model.class_name();
        let result = self
            .require_session()
            .and_then(|s| s.set_property("model_class", &model_class));
        self.guard(
            &mut report,
            "set_property:model_class",
            WarningKind::PropertyLog,
            result,
        );

        let result = self.upload_model_summary(learn);
        self.guard(
            &mut report,
            "log_artifact:model_summary",
            WarningKind::ArtifactLog,
            result,
        );

        if self.log_model_weights && learn.checkpoint_saver.is_none() {
            let reason = "no checkpoint saver attached to the learner; model weights will not be logged. \
                          Attach a `SaveModel` to log checkpoints";
            self.sink.warn(&HookWarning {
                hook: Hook::FitBegin,
                kind: WarningKind::MissingCheckpointSaver,
                message: reason.to_string(),
            });
            report.skipped("log_model_weights", reason);
        }

        report
    }

    /// Stage the model summary in a temp file and upload it. The file is
    /// removed when it goes out of scope, whether or not the upload worked.
    fn upload_model_summary(&self, learn: &LearnerState) -> Result<()> {
        let session = self.require_session()?;
        let summary = learn.model.summary().ok_or_else(|| {
            TrackerError::artifact(
                MODEL_SUMMARY,
                format!("{} has no textual representation", learn.model.class_name()),
            )
        })?;

        let mut staged = match &self.staging_dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        staged.write_all(summary.as_bytes())?;
        staged.flush()?;
        session.log_artifact(staged.path(), Some(MODEL_SUMMARY))
    }

    /// Log the batch counters, losses and hyperparameters. Errors propagate.
    pub fn batch_end(&self, learn: &LearnerState) -> Result<()> {
        let session = self.require_session()?;
        session.set_property("n_iter", &learn.n_iter.to_string())?;
        if !learn.training {
            return Ok(());
        }

        session.log_metric("batch__smooth_loss", learn.smooth_loss)?;
        session.log_metric("batch__loss", learn.loss)?;
        session.log_metric("batch__train_iter", learn.train_iter as f64)?;
        for group in &learn.hyper_groups {
            for (name, value) in group {
                session.log_metric(&format!("batch__opt.hypers.{name}"), *value)?;
            }
        }
        Ok(())
    }

    /// Log the epoch record, then upload the checkpoint. Metric errors
    /// propagate; the checkpoint upload is guarded.
    pub fn epoch_end(&self, learn: &LearnerState) -> Result<HookReport> {
        let session = self.require_session()?;
        for (name, value) in learn.recorder.entries() {
            match name {
                "epoch" => {}
                "time" => session.log_text("epoch__time", &value.to_string())?,
                _ => {
                    let key = format!("epoch__{name}");
                    let number = match value {
                        RecordValue::Number(v) => *v,
                        RecordValue::Text(text) => text.parse::<f64>().map_err(|_| {
                            TrackerError::InvalidMetric {
                                key: key.clone(),
                                reason: format!("'{text}' is not numeric"),
                            }
                        })?,
                    };
                    session.log_metric(&key, number)?;
                }
            }
        }

        let mut report = HookReport::new(Hook::EpochEnd);
        if self.log_model_weights {
            if let Some(saver) = learn.checkpoint_saver.as_deref() {
                let path = checkpoint_path(learn, saver);
                tracing::debug!(path = %path.display(), "Uploading checkpoint");
                let result = session.log_artifact(&path, None);
                self.guard(
                    &mut report,
                    "log_artifact:checkpoint",
                    WarningKind::ArtifactLog,
                    result,
                );
            }
        }
        Ok(report)
    }

    /// Close the session, or leave it running and say how to reach it.
    /// Never fails.
    pub fn fit_end(&mut self) -> HookReport {
        let mut report = HookReport::new(Hook::FitEnd);

        if !self.keep_session_running {
            let result = match self.session.take() {
                Some(session) => session.close(),
                None => Err(TrackerError::close("no session to close")),
            };
            self.guard(
                &mut report,
                "close_session",
                WarningKind::SessionClose,
                result,
            );
            return report;
        }

        match &self.session {
            Some(session) => {
                self.sink.notice(
                    Hook::FitEnd,
                    &format!(
                        "Session (id: {}, name: {}) is left running. Log more data to it through \
                         the same client, or reopen it later with `LocalTracker::resume(\"{}\")`.",
                        session.id(),
                        session.name(),
                        session.id()
                    ),
                );
                report.succeeded("keep_session_running");
            }
            None => self.guard(
                &mut report,
                "keep_session_running",
                WarningKind::NoActiveSession,
                Err(TrackerError::no_active_session("no session to leave running")),
            ),
        }
        report
    }
}

impl Callback for TrackerCallback {
    fn name(&self) -> &str {
        "tracker"
    }

    fn on_fit_begin(&mut self, learn: &LearnerState) -> Result<()> {
        self.fit_begin(learn);
        Ok(())
    }

    fn on_batch_end(&mut self, learn: &LearnerState) -> Result<()> {
        self.batch_end(learn)
    }

    fn on_epoch_end(&mut self, learn: &LearnerState) -> Result<()> {
        self.epoch_end(learn).map(|_| ())
    }

    fn on_fit_end(&mut self, _learn: &LearnerState) -> Result<()> {
        self.fit_end();
        Ok(())
    }
}
