use thiserror::Error;

use govsync_core::Epoch;

use crate::store::{EpochStep, StoreError};
use crate::upstream::UpstreamError;

/// Failure of a sync step or job.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Some entities of a fan-out step failed; the step's checkpoint stays unset.
    #[error("epoch {epoch} step {} incomplete: {failed} of {total} entities failed", .step.as_str())]
    StepIncomplete {
        epoch: Epoch,
        step: EpochStep,
        failed: usize,
        total: usize,
    },

    /// The chain has not completed an epoch yet.
    #[error("no completed epoch at tip {tip}")]
    NoCompletedEpoch { tip: Epoch },
}
