//! Training-loop side: learner state, callbacks, checkpoints and the fit driver.

pub mod callbacks;
pub mod checkpoint;
pub mod learner;
pub mod model;
pub mod state;

pub use callbacks::Callback;
pub use checkpoint::{CheckpointSaver, SaveModel, checkpoint_path};
pub use learner::{FitPlan, Learner, Phase, format_time};
pub use model::{Layer, Model, SequentialModel};
pub use state::{LearnerState, RecordValue, Recorder, SmoothLoss};
