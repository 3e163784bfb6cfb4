//! Outcomes of best-effort tracking calls and where their warnings go.
//!
//! Guarded hooks never return errors. Instead each attempted call is recorded
//! in a [`HookReport`] and every failure is handed to a [`WarningSink`].

use std::fmt;
use std::sync::Mutex;

/// Callback hook a warning originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    FitBegin,
    BatchEnd,
    EpochEnd,
    FitEnd,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::FitBegin => "on_fit_begin",
            Hook::BatchEnd => "on_batch_end",
            Hook::EpochEnd => "on_epoch_end",
            Hook::FitEnd => "on_fit_end",
        };
        f.write_str(name)
    }
}

/// Classification of a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    NoActiveSession,
    PropertyLog,
    ArtifactLog,
    SessionClose,
    MissingCheckpointSaver,
}

/// A recoverable failure reported by the tracker callback.
#[derive(Debug, Clone, PartialEq)]
pub struct HookWarning {
    pub hook: Hook,
    pub kind: WarningKind,
    pub message: String,
}

/// Result of one attempted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Skipped { reason: String },
    Failed { kind: WarningKind, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub operation: String,
    pub outcome: Outcome,
}

/// Every operation a guarded hook attempted, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct HookReport {
    pub hook: Hook,
    pub operations: Vec<OperationOutcome>,
}

impl HookReport {
    pub fn new(hook: Hook) -> Self {
        Self {
            hook,
            operations: Vec::new(),
        }
    }

    pub fn succeeded(&mut self, operation: &str) {
        self.push(operation, Outcome::Ok);
    }

    pub fn skipped(&mut self, operation: &str, reason: impl Into<String>) {
        self.push(
            operation,
            Outcome::Skipped {
                reason: reason.into(),
            },
        );
    }

    pub fn failed(&mut self, operation: &str, kind: WarningKind, reason: impl Into<String>) {
        self.push(
            operation,
            Outcome::Failed {
                kind,
                reason: reason.into(),
            },
        );
    }

    fn push(&mut self, operation: &str, outcome: Outcome) {
        self.operations.push(OperationOutcome {
            operation: operation.to_string(),
            outcome,
        });
    }

    /// Outcome of the first operation named `operation`.
    pub fn outcome(&self, operation: &str) -> Option<&Outcome> {
        self.operations
            .iter()
            .find(|o| o.operation == operation)
            .map(|o| &o.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.operations
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
    }

    /// No operation failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Receiver for warnings and notices emitted by the tracker callback.
pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: &HookWarning);

    /// Informational message that is not a failure.
    fn notice(&self, hook: Hook, message: &str) {
        tracing::info!(hook = %hook, "{message}");
    }
}

/// Sends warnings to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn warn(&self, warning: &HookWarning) {
        tracing::warn!(hook = %warning.hook, kind = ?warning.kind, "{}", warning.message);
    }
}

/// Keeps warnings and notices in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    warnings: Mutex<Vec<HookWarning>>,
    notices: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<HookWarning> {
        self.warnings.lock().unwrap().clone()
    }

    /// Warnings of one kind.
    pub fn of_kind(&self, kind: WarningKind) -> Vec<HookWarning> {
        self.warnings()
            .into_iter()
            .filter(|w| w.kind == kind)
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

impl WarningSink for CollectingSink {
    fn warn(&self, warning: &HookWarning) {
        self.warnings.lock().unwrap().push(warning.clone());
    }

    fn notice(&self, _hook: Hook, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_failures() {
        let mut report = HookReport::new(Hook::FitBegin);
        report.succeeded("acquire_session");
        report.failed("set_property:n_epoch", WarningKind::PropertyLog, "closed");
        report.skipped("log_model_weights", "no saver");

        assert!(!report.is_clean());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.outcome("acquire_session"), Some(&Outcome::Ok));
        assert!(matches!(
            report.outcome("log_model_weights"),
            Some(Outcome::Skipped { .. })
        ));
        assert!(report.outcome("missing").is_none());
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.warn(&HookWarning {
            hook: Hook::FitEnd,
            kind: WarningKind::SessionClose,
            message: "no session".into(),
        });
        sink.notice(Hook::FitEnd, "left running");
        assert_eq!(sink.of_kind(WarningKind::SessionClose).len(), 1);
        assert!(sink.of_kind(WarningKind::ArtifactLog).is_empty());
        assert_eq!(sink.notices(), vec!["left running".to_string()]);
    }

    #[test]
    fn test_hook_display() {
        assert_eq!(Hook::EpochEnd.to_string(), "on_epoch_end");
    }
}
