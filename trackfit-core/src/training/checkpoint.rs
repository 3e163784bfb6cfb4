//! Checkpoint saving during a fit.

use super::state::LearnerState;
use crate::error::Result;
use crate::persistence::atomic_write;
use std::path::PathBuf;

/// File extension of checkpoint files.
pub const CHECKPOINT_EXT: &str = "pth";

/// Component that persists model weights at the end of epochs.
pub trait CheckpointSaver {
    /// File name of the checkpoint, without epoch suffix or extension.
    fn file_name_stem(&self) -> &str;

    /// Whether a separate file is written for every epoch.
    fn every_epoch(&self) -> bool;

    /// Epoch of the most recent save.
    fn current_epoch(&self) -> usize;

    /// Write a checkpoint for the epoch that just finished.
    fn save(&mut self, learn: &LearnerState) -> Result<PathBuf>;
}

/// Path a saver writes to: `<path>/<model_dir>/<stem>_<epoch>.pth` when saving
/// every epoch, `<path>/<model_dir>/<stem>.pth` otherwise.
pub fn checkpoint_path(learn: &LearnerState, saver: &dyn CheckpointSaver) -> PathBuf {
    let file = if saver.every_epoch() {
        format!(
            "{}_{}.{CHECKPOINT_EXT}",
            saver.file_name_stem(),
            saver.current_epoch()
        )
    } else {
        format!("{}.{CHECKPOINT_EXT}", saver.file_name_stem())
    };
    learn.checkpoint_dir().join(file)
}

/// Saves `model.state_bytes()` after every epoch.
#[derive(Debug, Clone)]
pub struct SaveModel {
    fname: String,
    every_epoch: bool,
    epoch: usize,
}

impl SaveModel {
    pub fn new(fname: &str, every_epoch: bool) -> Self {
        Self {
            fname: fname.to_string(),
            every_epoch,
            epoch: 0,
        }
    }
}

impl Default for SaveModel {
    fn default() -> Self {
        Self::new("model", false)
    }
}

impl CheckpointSaver for SaveModel {
    fn file_name_stem(&self) -> &str {
        &self.fname
    }

    fn every_epoch(&self) -> bool {
        self.every_epoch
    }

    fn current_epoch(&self) -> usize {
        self.epoch
    }

    fn save(&mut self, learn: &LearnerState) -> Result<PathBuf> {
        self.epoch = learn.epoch;
        let path = checkpoint_path(learn, &*self);
        atomic_write(&path, &learn.model.state_bytes())?;
        tracing::debug!(path = %path.display(), epoch = self.epoch, "Saved checkpoint");
        Ok(path)
    }
}
