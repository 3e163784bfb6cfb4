//! Training-loop state visible to callbacks.

use super::checkpoint::CheckpointSaver;
use super::model::Model;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A value recorded at the end of an epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordValue::Number(v) => write!(f, "{v}"),
            RecordValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for RecordValue {
    fn from(v: f64) -> Self {
        RecordValue::Number(v)
    }
}

impl From<usize> for RecordValue {
    fn from(v: usize) -> Self {
        RecordValue::Number(v as f64)
    }
}

impl From<&str> for RecordValue {
    fn from(s: &str) -> Self {
        RecordValue::Text(s.to_string())
    }
}

impl From<String> for RecordValue {
    fn from(s: String) -> Self {
        RecordValue::Text(s)
    }
}

/// Metric names and values recorded for the last finished epoch.
///
/// `metric_names` and `log` are parallel.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub metric_names: Vec<String>,
    pub log: Vec<RecordValue>,
}

impl Recorder {
    pub fn record(&mut self, name: &str, value: impl Into<RecordValue>) {
        self.metric_names.push(name.to_string());
        self.log.push(value.into());
    }

    pub fn clear(&mut self) {
        self.metric_names.clear();
        self.log.clear();
    }

    /// `(name, value)` pairs in recording order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &RecordValue)> {
        self.metric_names
            .iter()
            .map(String::as_str)
            .zip(self.log.iter())
    }
}

/// Debiased exponential moving average of the training loss.
#[derive(Debug, Clone)]
pub struct SmoothLoss {
    beta: f64,
    count: u32,
    val: f64,
}

impl SmoothLoss {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            count: 0,
            val: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.val = 0.0;
    }

    pub fn accumulate(&mut self, loss: f64) {
        self.count += 1;
        self.val = loss + self.beta * (self.val - loss);
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.val / (1.0 - self.beta.powi(self.count as i32))
    }
}

impl Default for SmoothLoss {
    fn default() -> Self {
        Self::new(0.98)
    }
}

/// Everything a callback can read about the running fit.
pub struct LearnerState {
    pub model: Box<dyn Model>,
    /// Epochs planned for this fit.
    pub n_epoch: usize,
    /// Current epoch index.
    pub epoch: usize,
    /// Batches in the current phase.
    pub n_iter: usize,
    /// Batch index within the current phase.
    pub iter: usize,
    /// Training batches completed since the fit began.
    pub train_iter: usize,
    pub loss: f64,
    pub smooth_loss: f64,
    /// `true` while running training batches, `false` during evaluation.
    pub training: bool,
    /// Optimizer hyperparameters, one map per parameter group.
    pub hyper_groups: Vec<BTreeMap<String, f64>>,
    pub recorder: Recorder,
    /// Base directory of the learner.
    pub path: PathBuf,
    /// Checkpoint directory, relative to `path`.
    pub model_dir: PathBuf,
    pub checkpoint_saver: Option<Box<dyn CheckpointSaver>>,
}

impl LearnerState {
    pub fn new(model: Box<dyn Model>) -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert("lr".to_string(), 1e-3);
        Self {
            model,
            n_epoch: 0,
            epoch: 0,
            n_iter: 0,
            iter: 0,
            train_iter: 0,
            loss: 0.0,
            smooth_loss: 0.0,
            training: false,
            hyper_groups: vec![defaults],
            recorder: Recorder::default(),
            path: PathBuf::from("."),
            model_dir: PathBuf::from("models"),
            checkpoint_saver: None,
        }
    }

    /// Directory checkpoints are written to.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.path.join(&self.model_dir)
    }
}

impl fmt::Debug for LearnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearnerState")
            .field("model", &self.model.class_name())
            .field("n_epoch", &self.n_epoch)
            .field("epoch", &self.epoch)
            .field("n_iter", &self.n_iter)
            .field("train_iter", &self.train_iter)
            .field("loss", &self.loss)
            .field("smooth_loss", &self.smooth_loss)
            .field("training", &self.training)
            .field("has_checkpoint_saver", &self.checkpoint_saver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_entries_are_parallel() {
        let mut recorder = Recorder::default();
        recorder.record("epoch", 0usize);
        recorder.record("train_loss", 0.5);
        recorder.record("time", "00:01");

        let entries: Vec<(&str, &RecordValue)> = recorder.entries().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1], ("train_loss", &RecordValue::Number(0.5)));
        assert_eq!(entries[2].1.to_string(), "00:01");

        recorder.clear();
        assert_eq!(recorder.entries().count(), 0);
    }

    #[test]
    fn test_smooth_loss_is_debiased() {
        let mut smooth = SmoothLoss::default();
        smooth.accumulate(2.0);
        // A single observation is returned unchanged once debiased.
        assert!((smooth.value() - 2.0).abs() < 1e-12);

        smooth.accumulate(1.0);
        let v = smooth.value();
        assert!(v > 1.0 && v < 2.0);

        smooth.reset();
        assert_eq!(smooth.value(), 0.0);
    }
}
