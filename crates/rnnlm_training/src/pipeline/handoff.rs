//! src/pipeline/handoff.rs
//!
//! Single-slot handoff between the trainer and the derivation worker.
//!
//! Each direction (Incoming: trainer -> worker, Ready: worker -> trainer) is one
//! slot that holds at most one value. The slot is a capacity-1 bounded channel,
//! so its two states stand in for the classic full/empty semaphore pair that
//! starts at (0, 1):
//!
//! ```text
//!   put()   waits on "empty", stores the value, signals "full"
//!   take()  waits on "full", moves the value out, signals "empty"
//! ```
//!
//! Values are moved through the slot, never copied or swapped in place. Only one
//! side ever holds the writing end and one side the reading end, so at any
//! instant exactly one thread owns the right to touch the stored value.
//!
//! A writer may also [`wake`](SlotWriter::wake) the reader with a payload-free
//! signal. The pipeline uses this as the poison wake-up at shutdown.

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

/// The other end of the slot has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("handoff slot closed by the other side")]
pub(crate) struct SlotClosed;

/// What occupies a full slot.
#[derive(Debug)]
enum Signal<T> {
    Full(T),
    Wake,
}

/// Creates an empty slot and returns its writing and reading ends.
pub(crate) fn slot<T>() -> (SlotWriter<T>, SlotReader<T>) {
    let (tx, rx) = bounded(1);
    (SlotWriter { tx }, SlotReader { rx })
}

/// Writing end of a slot. Owned by exactly one thread.
#[derive(Debug)]
pub(crate) struct SlotWriter<T> {
    tx: Sender<Signal<T>>,
}

impl<T> SlotWriter<T> {
    /// Blocks until the slot is empty, then stores `value`.
    pub(crate) fn put(&self, value: T) -> Result<(), SlotClosed> {
        self.tx.send(Signal::Full(value)).map_err(|_| SlotClosed)
    }

    /// Blocks until the slot is empty, then signals "full" with no payload.
    pub(crate) fn wake(&self) -> Result<(), SlotClosed> {
        self.tx.send(Signal::Wake).map_err(|_| SlotClosed)
    }
}

/// Reading end of a slot. Owned by exactly one thread.
#[derive(Debug)]
pub(crate) struct SlotReader<T> {
    rx: Receiver<Signal<T>>,
}

impl<T> SlotReader<T> {
    /// Blocks until the slot is full and empties it.
    ///
    /// Returns `Ok(None)` for a payload-free wake-up.
    pub(crate) fn take(&self) -> Result<Option<T>, SlotClosed> {
        match self.rx.recv() {
            Ok(Signal::Full(value)) => Ok(Some(value)),
            Ok(Signal::Wake) => Ok(None),
            Err(_) => Err(SlotClosed),
        }
    }

    /// Number of values currently stored: 0 or 1.
    pub(crate) fn occupancy(&self) -> usize {
        self.rx.len()
    }
}
