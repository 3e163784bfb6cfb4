//! Training callbacks.

use super::state::LearnerState;
use crate::error::Result;

/// Hooks invoked by [`super::Learner::fit`].
///
/// Order across one fit: `on_fit_begin` once; per epoch, `on_batch_end` after
/// every batch (training and evaluation) then `on_epoch_end`; finally
/// `on_fit_end`, which also runs when the fit was aborted by an error.
pub trait Callback {
    fn name(&self) -> &str;

    fn on_fit_begin(&mut self, _learn: &LearnerState) -> Result<()> {
        Ok(())
    }

    fn on_batch_end(&mut self, _learn: &LearnerState) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, _learn: &LearnerState) -> Result<()> {
        Ok(())
    }

    fn on_fit_end(&mut self, _learn: &LearnerState) -> Result<()> {
        Ok(())
    }
}
