//! src/pipeline/mod.rs
//!
//! This module implements the lookahead `Trainer`.
//!
//! The trainer overlaps the per-minibatch feature derivation (active-word
//! subsampling, sparse feature subsetting, ...) with the training step. Derivation
//! runs on one dedicated background thread; training runs on the caller's thread.
//! The two are joined by two single-slot handoffs and exactly one minibatch of
//! lookahead.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller thread                                 derivation thread
//!   ─────────────                                 ─────────────────
//!   submit(mb_k)
//!     ├─ put Incoming(mb_k) ─────────────────────► take Incoming
//!     │                                             derive(mb_k)
//!     ├─ take Ready ◄──────────────────────────── put Ready(mb_{k-1})
//!     │  (skipped on k = 0)                        (published earlier)
//!     └─ CoreTrainer::train(mb_{k-1})   overlaps    derive(mb_k)
//!   finalize()
//!     ├─ end-of-input + poison wake-up on Incoming ──► worker exits
//!     ├─ train the last outstanding minibatch
//!     └─ join the worker
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/pipeline/
//! ├── mod.rs       # Collaborator traits + public re-exports
//! ├── config.rs    # TrainerConfig and builder
//! ├── handoff.rs   # Single-slot handoff (put / take / wake)
//! ├── worker.rs    # DerivationWorker thread loop
//! └── trainer.rs   # Trainer: submit / finalize / Drop
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let deriver = RnnlmFeatureDeriver::new(
//!     RnnlmDeriverConfig::builder().vocab_size(10_000).build(),
//! )?;
//! let mut trainer = Trainer::new(TrainerConfig::default(), deriver, core_trainer)?;
//!
//! for minibatch in reader {
//!     trainer.submit(minibatch?)?;
//! }
//! trainer.finalize()?; // trains the last minibatch and joins the worker
//! ```

use anyhow::Result;

mod config;
mod handoff;
mod trainer;
mod worker;

pub use config::{TrainerConfig, TrainerConfigBuilder, DEFAULT_LOG_INTERVAL, DEFAULT_WORKER_NAME};
pub use trainer::Trainer;

/// Computes the derived data of a minibatch on the background thread.
///
/// `derive` must be a pure function of the minibatch and of state fixed at
/// construction: it runs concurrently with [`CoreTrainer::train`], and the
/// handoff slots are the only synchronization between the two. It is never
/// called concurrently with itself.
pub trait FeatureDeriver<M>: Send + 'static {
    /// Data computed from one minibatch and consumed by one training step.
    type Derived: Send + 'static;

    fn derive(&self, minibatch: &M) -> Result<Self::Derived>;
}

/// Runs the training step for a minibatch whose derived data is ready.
///
/// Called on the thread that owns the [`Trainer`], in submission order, exactly
/// once per minibatch.
pub trait CoreTrainer<M, D> {
    fn train(&mut self, minibatch: M, derived: D) -> Result<()>;
}

impl<M, D, F> CoreTrainer<M, D> for F
where
    F: FnMut(M, D) -> Result<()>,
{
    fn train(&mut self, minibatch: M, derived: D) -> Result<()> {
        self(minibatch, derived)
    }
}
