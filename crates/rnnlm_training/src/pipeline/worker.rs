//! src/pipeline/worker.rs
//!
//! Background thread that computes the derived data of each submitted minibatch.
//!
//! # Worker Lifecycle
//! 1. Wait for Incoming to be full
//! 2. Payload-free wake-up with end-of-input set: exit
//! 3. Move the minibatch out of Incoming (the trainer may refill it right away)
//! 4. Derive
//! 5. Wait for Ready to be empty (the only backpressure point)
//! 6. Publish (minibatch, derived) into Ready and return to step 1
//!
//! A derivation failure is published into Ready in place of the pair, after which
//! the worker exits. The trainer is therefore always unblocked at its next Ready
//! wait, either by data or by the failure.

use anyhow::{Context, Result};
use log::{debug, trace, warn};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::handoff::{SlotReader, SlotWriter};
use super::{FeatureDeriver, TrainerConfig};
use crate::error::PipelineError;

/// A minibatch on its way to the worker.
#[derive(Debug)]
pub(crate) struct Submission<M> {
    pub(crate) sequence: u64,
    pub(crate) minibatch: M,
}

/// A minibatch together with its derived data, ready to be trained on.
#[derive(Debug)]
pub(crate) struct Prepared<M, D> {
    pub(crate) sequence: u64,
    pub(crate) minibatch: M,
    pub(crate) derived: D,
}

/// What the worker publishes into Ready.
pub(crate) type Outcome<M, D> = Result<Prepared<M, D>>;

/// Handle to the derivation thread. Owned by the trainer.
pub(crate) struct DerivationWorker {
    handle: Option<thread::JoinHandle<()>>,
}

impl DerivationWorker {
    /// Spawns the derivation thread.
    pub(crate) fn spawn<M, F>(
        config: &TrainerConfig,
        deriver: F,
        incoming: SlotReader<Submission<M>>,
        ready: SlotWriter<Outcome<M, F::Derived>>,
        end_of_input: Arc<AtomicBool>,
    ) -> Result<Self>
    where
        M: Send + 'static,
        F: FeatureDeriver<M>,
    {
        let log_interval = config.log_interval;
        let handle = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || run(deriver, incoming, ready, end_of_input, log_interval))
            .with_context(|| format!("Failed to spawn derivation thread {:?}", config.worker_name))?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Waits for the thread to exit. Later calls return `Ok(())` immediately.
    pub(crate) fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|payload| PipelineError::WorkerPanicked(panic_message(payload.as_ref())).into())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

fn run<M, F>(
    deriver: F,
    incoming: SlotReader<Submission<M>>,
    ready: SlotWriter<Outcome<M, F::Derived>>,
    end_of_input: Arc<AtomicBool>,
    log_interval: usize,
) where
    F: FeatureDeriver<M>,
{
    debug!("derivation worker started");
    let mut derived_count: u64 = 0;

    loop {
        let Submission {
            sequence,
            minibatch,
        } = match incoming.take() {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                // The flag is only trusted right after a wake-up from Incoming.
                if end_of_input.load(Ordering::Acquire) {
                    debug!("end of input after {} minibatches", derived_count);
                    break;
                }
                warn!("wake-up on Incoming without end of input, ignoring");
                continue;
            }
            Err(_) => {
                debug!("trainer dropped Incoming, stopping");
                break;
            }
        };

        trace!("deriving minibatch {}", sequence);
        let outcome = match deriver.derive(&minibatch) {
            Ok(derived) => Ok(Prepared {
                sequence,
                minibatch,
                derived,
            }),
            Err(err) => {
                warn!("derivation failed for minibatch {}: {:#}", sequence, err);
                Err(PipelineError::derivation(sequence, err).into())
            }
        };
        let failed = outcome.is_err();

        if ready.put(outcome).is_err() {
            debug!("trainer dropped Ready, stopping");
            break;
        }
        if failed {
            break;
        }

        derived_count += 1;
        if log_interval > 0 && derived_count % log_interval as u64 == 0 {
            debug!("derived {} minibatches", derived_count);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
