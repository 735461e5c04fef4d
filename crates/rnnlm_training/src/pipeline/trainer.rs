//! src/pipeline/trainer.rs
//!
//! The caller-facing half of the pipeline.
//!
//! `submit(mb_k)` hands `mb_k` to the worker and then trains on `mb_{k-1}`, whose
//! derived data the worker has published in the meantime. The worker derives
//! `mb_k` while `mb_{k-1}` trains. Minibatch `k` is thus trained during call
//! `k + 1`, and the last one during `finalize()`.

use anyhow::Result;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::handoff::{slot, SlotReader, SlotWriter};
use super::worker::{DerivationWorker, Outcome, Prepared, Submission};
use super::{CoreTrainer, FeatureDeriver, TrainerConfig};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accepting,
    Finalized,
    Failed,
}

/// Trains on minibatches one at a time while the next one's derived data is
/// computed on a background thread.
///
/// # Type parameters:
/// - `M`: Minibatch type, moved through the pipeline without copies
/// - `F`: [`FeatureDeriver`] run on the background thread
/// - `T`: [`CoreTrainer`] run on the caller's thread
///
/// # Thread safety:
/// `submit` and `finalize` take `&mut self`, so calls are sequential by
/// construction. Dropping the trainer finalizes it.
pub struct Trainer<M, F, T>
where
    M: Send + 'static,
    F: FeatureDeriver<M>,
    T: CoreTrainer<M, F::Derived>,
{
    core: T,
    incoming: SlotWriter<Submission<M>>,
    ready: SlotReader<Outcome<M, F::Derived>>,
    end_of_input: Arc<AtomicBool>,
    worker: DerivationWorker,
    // Sequence number of the minibatch handed to the worker and not yet trained.
    // `None` before the first submit: nothing can be ready yet.
    in_flight: Option<u64>,
    num_processed: u64,
    num_trained: u64,
    state: State,
}

impl<M, F, T> Trainer<M, F, T>
where
    M: Send + 'static,
    F: FeatureDeriver<M>,
    T: CoreTrainer<M, F::Derived>,
{
    /// Validates `config` and starts the derivation thread.
    pub fn new(config: TrainerConfig, deriver: F, core: T) -> Result<Self> {
        config.validate()?;

        let (incoming, incoming_rx) = slot();
        let (ready_tx, ready) = slot();
        let end_of_input = Arc::new(AtomicBool::new(false));
        let worker = DerivationWorker::spawn(
            &config,
            deriver,
            incoming_rx,
            ready_tx,
            end_of_input.clone(),
        )?;
        info!("trainer started, deriving on thread {:?}", config.worker_name);

        Ok(Self {
            core,
            incoming,
            ready,
            end_of_input,
            worker,
            in_flight: None,
            num_processed: 0,
            num_trained: 0,
            state: State::Accepting,
        })
    }

    /// Hands `minibatch` to the derivation thread and trains on the previously
    /// submitted minibatch.
    ///
    /// Blocks until the previous minibatch's derived data is published. Any
    /// failure (derivation, training, or a lost worker) is fatal: the worker is
    /// joined, the error is returned, and every later call returns
    /// [`PipelineError::Closed`].
    pub fn submit(&mut self, minibatch: M) -> Result<()> {
        if self.state != State::Accepting {
            return Err(PipelineError::Closed.into());
        }
        if let Err(err) = self.advance(minibatch) {
            self.abandon();
            return Err(err);
        }
        Ok(())
    }

    /// Stops the pipeline: trains on the last outstanding minibatch and joins the
    /// derivation thread.
    ///
    /// Called automatically on drop. Calling it again, or after a failed
    /// `submit`, does nothing.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state != State::Accepting {
            return Ok(());
        }
        self.state = State::Finalized;
        debug!(
            "finalizing after {} submitted minibatches",
            self.num_processed
        );

        self.end_of_input.store(true, Ordering::Release);
        // The worker may already be gone after a failure; the flush below reports it.
        let _ = self.incoming.wake();

        let flushed = match self.in_flight.take() {
            Some(sequence) => self.train_ready(sequence),
            None => Ok(()),
        };
        let joined = self.worker.join();

        match (flushed, joined) {
            (Err(err), _) | (Ok(()), Err(err)) => {
                self.state = State::Failed;
                error!("trainer finalize failed: {:#}", err);
                Err(err)
            }
            (Ok(()), Ok(())) => {
                info!("trainer finished, trained {} minibatches", self.num_trained);
                Ok(())
            }
        }
    }

    /// Number of minibatches handed to the derivation thread so far.
    pub fn num_minibatches_processed(&self) -> u64 {
        self.num_processed
    }

    /// Number of minibatches the core trainer has completed.
    pub fn num_minibatches_trained(&self) -> u64 {
        self.num_trained
    }

    /// Whether `submit` will accept another minibatch.
    pub fn is_accepting(&self) -> bool {
        self.state == State::Accepting
    }

    /// Whether the derivation thread is still alive.
    pub fn is_worker_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Number of published pairs waiting in Ready: 0 or 1.
    pub fn ready_occupancy(&self) -> usize {
        self.ready.occupancy()
    }

    /// Gives access to the core trainer, e.g. to read its model after `finalize`.
    pub fn core(&self) -> &T {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut T {
        &mut self.core
    }

    fn advance(&mut self, minibatch: M) -> Result<()> {
        // Hand over first so the worker derives `minibatch` while the previous
        // one trains.
        let sequence = self.num_processed;
        let handed_over = self
            .incoming
            .put(Submission {
                sequence,
                minibatch,
            })
            .is_ok();
        if handed_over {
            self.num_processed += 1;
        }

        // A worker that stopped after a derivation failure left it in Ready.
        if let Some(previous) = self.in_flight.take() {
            self.train_ready(previous)?;
        }
        if !handed_over {
            return Err(self.worker_lost());
        }
        self.in_flight = Some(sequence);
        Ok(())
    }

    /// Takes the pair for minibatch `expected` from Ready and trains on it.
    fn train_ready(&mut self, expected: u64) -> Result<()> {
        let outcome = match self.ready.take() {
            Ok(Some(outcome)) => outcome,
            Ok(None) | Err(_) => return Err(self.worker_lost()),
        };
        let Prepared {
            sequence,
            minibatch,
            derived,
        } = outcome?;
        debug_assert_eq!(sequence, expected, "minibatches must arrive in submission order");

        self.core
            .train(minibatch, derived)
            .map_err(|err| PipelineError::training(sequence, err))?;
        self.num_trained += 1;
        Ok(())
    }

    /// Builds the error for a worker that stopped answering, preferring its panic.
    fn worker_lost(&mut self) -> anyhow::Error {
        match self.worker.join() {
            Err(err) => err,
            Ok(()) => PipelineError::WorkerDisconnected.into(),
        }
    }

    /// Shuts the worker down after a failure; the failure itself is returned by the caller.
    fn abandon(&mut self) {
        self.state = State::Failed;
        self.in_flight = None;
        self.end_of_input.store(true, Ordering::Release);
        let _ = self.incoming.wake();
        if let Err(err) = self.worker.join() {
            error!("derivation worker did not shut down cleanly: {:#}", err);
        }
    }
}

impl<M, F, T> Drop for Trainer<M, F, T>
where
    M: Send + 'static,
    F: FeatureDeriver<M>,
    T: CoreTrainer<M, F::Derived>,
{
    fn drop(&mut self) {
        if self.state == State::Accepting {
            if let Err(err) = self.finalize() {
                error!("trainer dropped with an unreported failure: {:#}", err);
            }
        }
    }
}

#[cfg(test)]
mod trainer_test {
    use super::*;
    use anyhow::bail;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Square;

    impl FeatureDeriver<u64> for Square {
        type Derived = u64;

        fn derive(&self, minibatch: &u64) -> Result<u64> {
            Ok(minibatch * minibatch)
        }
    }

    type Log = Rc<RefCell<Vec<(u64, u64)>>>;

    fn recording(log: &Log) -> impl FnMut(u64, u64) -> Result<()> {
        let log = log.clone();
        move |minibatch, derived| {
            log.borrow_mut().push((minibatch, derived));
            Ok(())
        }
    }

    #[test]
    fn test_first_submit_trains_nothing() -> Result<()> {
        let log = Log::default();
        let mut trainer = Trainer::new(TrainerConfig::default(), Square, recording(&log))?;

        trainer.submit(3)?;
        assert!(log.borrow().is_empty());
        assert_eq!(trainer.num_minibatches_processed(), 1);
        assert_eq!(trainer.num_minibatches_trained(), 0);

        trainer.submit(4)?;
        assert_eq!(*log.borrow(), vec![(3, 9)]);

        trainer.finalize()?;
        assert_eq!(*log.borrow(), vec![(3, 9), (4, 16)]);
        assert_eq!(trainer.num_minibatches_trained(), 2);
        assert!(!trainer.is_worker_running());
        Ok(())
    }

    #[test]
    fn test_finalize_is_idempotent_and_closes_submit() -> Result<()> {
        let log = Log::default();
        let mut trainer = Trainer::new(TrainerConfig::default(), Square, recording(&log))?;
        trainer.submit(1)?;
        trainer.finalize()?;
        trainer.finalize()?;
        assert_eq!(log.borrow().len(), 1);

        let err = trainer.submit(2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Closed)
        ));
        Ok(())
    }

    #[test]
    fn test_training_failure_closes_trainer() -> Result<()> {
        let mut trainer = Trainer::new(
            TrainerConfig::default(),
            Square,
            |minibatch: u64, _derived: u64| -> Result<()> {
                if minibatch == 1 {
                    bail!("gradient exploded");
                }
                Ok(())
            },
        )?;

        trainer.submit(0)?;
        trainer.submit(1)?;
        // Minibatch 1 is trained (and fails) during the third call.
        let err = trainer.submit(2).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Training { sequence, .. }) => assert_eq!(*sequence, 1),
            other => panic!("expected a training failure, got {:?}", other),
        }
        assert!(!trainer.is_accepting());
        assert!(!trainer.is_worker_running());
        assert!(trainer.submit(3).is_err());
        // Nothing left to flush.
        trainer.finalize()?;
        Ok(())
    }

    #[test]
    fn test_core_access() -> Result<()> {
        let mut trainer = Trainer::new(TrainerConfig::default(), Square, Collect::default())?;
        trainer.submit(5)?;
        trainer.submit(6)?;
        trainer.finalize()?;
        assert_eq!(trainer.core().0, vec![25, 36]);
        trainer.core_mut().0.clear();
        assert!(trainer.core().0.is_empty());
        Ok(())
    }

    #[derive(Default)]
    struct Collect(Vec<u64>);

    impl CoreTrainer<u64, u64> for Collect {
        fn train(&mut self, _minibatch: u64, derived: u64) -> Result<()> {
            self.0.push(derived);
            Ok(())
        }
    }
}
