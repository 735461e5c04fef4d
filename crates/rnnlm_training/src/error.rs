//! Error kinds surfaced by the training pipeline.
//!
//! Every fallible operation in this crate returns `anyhow::Result`. Failures that
//! callers may want to tell apart carry a [`PipelineError`] at the root of the
//! chain, recoverable with `err.downcast_ref::<PipelineError>()`.

use thiserror::Error;

/// Boxed cause attached to derivation and training failures.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or inconsistent inputs. Always reported before the worker is spawned.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The feature deriver could not process minibatch `sequence` (0-based).
    #[error("feature derivation failed for minibatch {sequence}")]
    Derivation {
        sequence: u64,
        #[source]
        source: Cause,
    },

    /// The core trainer failed on minibatch `sequence` (0-based).
    #[error("training step failed for minibatch {sequence}")]
    Training {
        sequence: u64,
        #[source]
        source: Cause,
    },

    #[error("derivation worker panicked: {0}")]
    WorkerPanicked(String),

    /// The worker went away without reporting a failure or panicking.
    #[error("derivation worker exited before the handoff completed")]
    WorkerDisconnected,

    /// `submit` after `finalize` or after an earlier failure.
    #[error("trainer no longer accepts minibatches")]
    Closed,
}

impl PipelineError {
    pub(crate) fn derivation(sequence: u64, err: anyhow::Error) -> Self {
        Self::Derivation {
            sequence,
            source: err.into(),
        }
    }

    pub(crate) fn training(sequence: u64, err: anyhow::Error) -> Self {
        Self::Training {
            sequence,
            source: err.into(),
        }
    }

    /// Sequence number of the minibatch involved, when the failure concerns one.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Derivation { sequence, .. } | Self::Training { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }
}
