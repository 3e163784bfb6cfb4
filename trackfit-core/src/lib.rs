//! # trackfit-core
//!
//! Experiment tracking for training loops. A [`TrackerCallback`] is attached
//! to a [`Learner`] and forwards losses, epoch metrics, optimizer
//! hyperparameters, the model summary and checkpoints to a tracking
//! [`Session`].
//!
//! Tracking backends implement [`TrackingClient`]: [`LocalTracker`] keeps runs
//! on disk, [`InMemoryTracker`] keeps them in memory for tests.

pub mod config;
pub mod error;
pub mod persistence;
pub mod tracker;
pub mod tracking;
pub mod training;

// Re-export commonly used types at the crate root.
pub use config::{TrackerConfig, load_config};
pub use error::{Result, TrackerError};
pub use tracker::{
    InMemoryTracker, LocalSession, LocalTracker, MemorySession, RunRecord, RunState, Session,
    SessionEvent, TrackingClient,
};
pub use tracking::{
    CollectingSink, Hook, HookReport, HookWarning, Outcome, TrackerCallback, TracingSink,
    WarningKind, WarningSink,
};
pub use training::{
    Callback, CheckpointSaver, FitPlan, Learner, LearnerState, Model, Phase, RecordValue,
    SaveModel, SequentialModel,
};
