//! Synchronous fit driver.
//!
//! The learner owns the [`LearnerState`] and a list of callbacks. The caller
//! supplies a step closure that runs one batch and returns its loss; the
//! learner takes care of counters, loss smoothing, epoch records, checkpoints
//! and hook dispatch.

use super::callbacks::Callback;
use super::checkpoint::CheckpointSaver;
use super::model::Model;
use super::state::{LearnerState, SmoothLoss};
use crate::error::{Result, TrackerError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

/// Shape of one fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitPlan {
    pub n_epoch: usize,
    pub train_batches: usize,
    pub valid_batches: usize,
}

impl FitPlan {
    pub fn new(n_epoch: usize, train_batches: usize) -> Self {
        Self {
            n_epoch,
            train_batches,
            valid_batches: 0,
        }
    }

    pub fn with_validation(mut self, valid_batches: usize) -> Self {
        self.valid_batches = valid_batches;
        self
    }
}

/// Which kind of batch the step closure is asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Valid,
}

pub struct Learner {
    pub state: LearnerState,
    callbacks: Vec<Box<dyn Callback>>,
    smooth: SmoothLoss,
}

impl Learner {
    pub fn new(model: Box<dyn Model>) -> Self {
        Self {
            state: LearnerState::new(model),
            callbacks: Vec::new(),
            smooth: SmoothLoss::default(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state.path = path.into();
        self
    }

    pub fn with_model_dir(mut self, model_dir: impl Into<PathBuf>) -> Self {
        self.state.model_dir = model_dir.into();
        self
    }

    pub fn with_hyper_groups(mut self, groups: Vec<BTreeMap<String, f64>>) -> Self {
        self.state.hyper_groups = groups;
        self
    }

    pub fn with_checkpoint_saver(mut self, saver: Box<dyn CheckpointSaver>) -> Self {
        self.state.checkpoint_saver = Some(saver);
        self
    }

    pub fn add_callback(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    /// Run a fit. `step` is called once per batch and returns the batch loss.
    ///
    /// On error the remaining epochs are skipped, `on_fit_end` still runs for
    /// every callback, and the first error is returned.
    pub fn fit<F>(&mut self, plan: FitPlan, mut step: F) -> Result<()>
    where
        F: FnMut(&mut LearnerState, Phase) -> Result<f64>,
    {
        self.state.n_epoch = plan.n_epoch;
        self.state.epoch = 0;
        self.state.train_iter = 0;
        self.smooth.reset();
        tracing::info!(
            n_epoch = plan.n_epoch,
            train_batches = plan.train_batches,
            valid_batches = plan.valid_batches,
            "Starting fit"
        );

        let outcome = self.run(plan, &mut step);
        if let Err(e) = &outcome {
            tracing::warn!(epoch = self.state.epoch, error = %e, "Fit aborted");
        }

        for cb in &mut self.callbacks {
            if let Err(e) = cb.on_fit_end(&self.state) {
                tracing::warn!(callback = cb.name(), error = %e, "on_fit_end failed");
            }
        }
        outcome
    }

    fn run<F>(&mut self, plan: FitPlan, step: &mut F) -> Result<()>
    where
        F: FnMut(&mut LearnerState, Phase) -> Result<f64>,
    {
        for cb in &mut self.callbacks {
            cb.on_fit_begin(&self.state)?;
        }

        for epoch in 0..plan.n_epoch {
            self.state.epoch = epoch;
            let started = Instant::now();

            let train_loss = self.run_phase(Phase::Train, plan.train_batches, step)?;
            let valid_loss = if plan.valid_batches > 0 {
                self.run_phase(Phase::Valid, plan.valid_batches, step)?
            } else {
                None
            };

            // A phase without batches has no mean loss to record.
            let recorder = &mut self.state.recorder;
            recorder.clear();
            recorder.record("epoch", epoch);
            if let Some(train_loss) = train_loss {
                recorder.record("train_loss", train_loss);
            }
            if let Some(valid_loss) = valid_loss {
                recorder.record("valid_loss", valid_loss);
            }
            recorder.record("time", format_time(started.elapsed().as_secs_f64()));

            self.save_checkpoint()?;

            for cb in &mut self.callbacks {
                cb.on_epoch_end(&self.state)?;
            }
            tracing::debug!(epoch, ?train_loss, ?valid_loss, "Epoch finished");
        }
        Ok(())
    }

    /// Runs `n_batches` batches and returns their mean loss, or `None` when
    /// there were no batches.
    fn run_phase<F>(
        &mut self,
        phase: Phase,
        n_batches: usize,
        step: &mut F,
    ) -> Result<Option<f64>>
    where
        F: FnMut(&mut LearnerState, Phase) -> Result<f64>,
    {
        self.state.training = phase == Phase::Train;
        self.state.n_iter = n_batches;
        let mut total = 0.0;

        for i in 0..n_batches {
            self.state.iter = i;
            let loss = step(&mut self.state, phase)?;
            if !loss.is_finite() {
                return Err(TrackerError::training(format!(
                    "non-finite loss {loss} at epoch {} batch {i}",
                    self.state.epoch
                )));
            }
            self.state.loss = loss;
            if self.state.training {
                self.smooth.accumulate(loss);
                self.state.smooth_loss = self.smooth.value();
                self.state.train_iter += 1;
            }
            total += loss;

            for cb in &mut self.callbacks {
                cb.on_batch_end(&self.state)?;
            }
        }

        Ok((n_batches > 0).then(|| total / n_batches as f64))
    }

    fn save_checkpoint(&mut self) -> Result<()> {
        if let Some(mut saver) = self.state.checkpoint_saver.take() {
            let saved = saver.save(&self.state);
            self.state.checkpoint_saver = Some(saver);
            saved?;
        }
        Ok(())
    }
}

/// Format elapsed seconds as `mm:ss`, or `h:mm:ss` past one hour.
pub fn format_time(secs: f64) -> String {
    let t = secs.max(0.0) as u64;
    let (h, m, s) = (t / 3600, (t % 3600) / 60, t % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::checkpoint::SaveModel;
    use crate::training::model::SequentialModel;
    use crate::training::state::RecordValue;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Records hook names, plus the train flag for batch hooks.
    struct Trace {
        events: Rc<RefCell<Vec<String>>>,
        fail_on_batch: Option<usize>,
    }

    impl Callback for Trace {
        fn name(&self) -> &str {
            "trace"
        }

        fn on_fit_begin(&mut self, _learn: &LearnerState) -> Result<()> {
            self.events.borrow_mut().push("fit_begin".into());
            Ok(())
        }

        fn on_batch_end(&mut self, learn: &LearnerState) -> Result<()> {
            if Some(learn.train_iter) == self.fail_on_batch {
                return Err(TrackerError::training("boom"));
            }
            let tag = if learn.training { "train" } else { "valid" };
            self.events.borrow_mut().push(format!("batch_{tag}"));
            Ok(())
        }

        fn on_epoch_end(&mut self, learn: &LearnerState) -> Result<()> {
            self.events
                .borrow_mut()
                .push(format!("epoch_{}", learn.epoch));
            Ok(())
        }

        fn on_fit_end(&mut self, _learn: &LearnerState) -> Result<()> {
            self.events.borrow_mut().push("fit_end".into());
            Ok(())
        }
    }

    fn learner() -> Learner {
        Learner::new(Box::new(SequentialModel::mlp(2, 4, 1)))
    }

    #[test]
    fn test_hook_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut learn = learner();
        learn.add_callback(Box::new(Trace {
            events: Rc::clone(&events),
            fail_on_batch: None,
        }));

        learn
            .fit(FitPlan::new(2, 2).with_validation(1), |_, _| Ok(0.5))
            .unwrap();

        assert_eq!(
            *events.borrow(),
            vec![
                "fit_begin",
                "batch_train",
                "batch_train",
                "batch_valid",
                "epoch_0",
                "batch_train",
                "batch_train",
                "batch_valid",
                "epoch_1",
                "fit_end",
            ]
        );
        assert_eq!(learn.state.train_iter, 4);
        assert_eq!(learn.state.n_epoch, 2);
    }

    #[test]
    fn test_epoch_record() {
        let mut learn = learner();
        let mut losses = vec![1.0, 3.0, 10.0].into_iter();
        learn
            .fit(FitPlan::new(1, 2).with_validation(1), |_, _| {
                Ok(losses.next().unwrap())
            })
            .unwrap();

        let names: Vec<&str> = learn.state.recorder.entries().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["epoch", "train_loss", "valid_loss", "time"]);
        assert_eq!(learn.state.recorder.log[1], RecordValue::Number(2.0));
        assert_eq!(learn.state.recorder.log[2], RecordValue::Number(10.0));
        assert!(matches!(learn.state.recorder.log[3], RecordValue::Text(_)));
        assert_eq!(learn.state.loss, 10.0);
    }

    #[test]
    fn test_empty_train_phase_records_no_loss() {
        let mut learn = learner();
        learn
            .fit(FitPlan::new(1, 0).with_validation(1), |_, _| Ok(0.7))
            .unwrap();

        let names: Vec<&str> = learn.state.recorder.entries().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["epoch", "valid_loss", "time"]);
        assert_eq!(learn.state.recorder.log[1], RecordValue::Number(0.7));
    }

    #[test]
    fn test_callback_error_aborts_but_runs_fit_end() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut learn = learner();
        learn.add_callback(Box::new(Trace {
            events: Rc::clone(&events),
            fail_on_batch: Some(3),
        }));

        let err = learn.fit(FitPlan::new(5, 2), |_, _| Ok(0.1)).unwrap_err();
        assert!(matches!(err, TrackerError::Training(_)));
        let events = events.borrow();
        assert_eq!(events.last().map(String::as_str), Some("fit_end"));
        assert!(!events.contains(&"epoch_1".to_string()));
    }

    #[test]
    fn test_non_finite_loss_is_rejected() {
        let mut learn = learner();
        let err = learn
            .fit(FitPlan::new(1, 1), |_, _| Ok(f64::NAN))
            .unwrap_err();
        assert!(err.to_string().contains("non-finite loss"));
    }

    #[test]
    fn test_checkpoint_saved_each_epoch() {
        let dir = TempDir::new().unwrap();
        let mut learn = learner()
            .with_path(dir.path())
            .with_checkpoint_saver(Box::new(SaveModel::new("ckpt", true)));
        learn.fit(FitPlan::new(2, 1), |_, _| Ok(0.2)).unwrap();

        assert!(dir.path().join("models/ckpt_0.pth").exists());
        assert!(dir.path().join("models/ckpt_1.pth").exists());
        assert!(learn.state.checkpoint_saver.is_some());
    }

    #[test]
    fn test_step_can_adjust_hypers() {
        let mut learn = learner();
        learn
            .fit(FitPlan::new(1, 3), |state, _| {
                state.hyper_groups[0].insert("lr".into(), 0.1 * state.iter as f64);
                Ok(1.0)
            })
            .unwrap();
        assert_eq!(learn.state.hyper_groups[0]["lr"], 0.2);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.4), "00:00");
        assert_eq!(format_time(61.0), "01:01");
        assert_eq!(format_time(3725.0), "1:02:05");
    }
}
