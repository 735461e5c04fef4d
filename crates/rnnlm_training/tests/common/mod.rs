#![allow(dead_code)]

use rnnlm_training::{CoreTrainer, FeatureDeriver};

use anyhow::{bail, Result};
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Routes `log` output through the test harness; safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Derived value the tag deriver computes for `tag`.
pub fn derived_for(tag: u64) -> u64 {
    tag.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0xA5A5
}

/// Derives from `u64` tags, with optional delay and failure injection.
///
/// Holds `derive_count` so tests can observe how many derivations finished and,
/// via `Arc::strong_count`, whether the worker has dropped the deriver.
pub struct TagDeriver {
    pub derive_count: Arc<AtomicU64>,
    pub fixed_delay: Option<Duration>,
    pub max_random_delay_us: u64,
    pub fail_on: Option<u64>,
    pub panic_on: Option<u64>,
    pub threads_seen: Arc<Mutex<Vec<Option<String>>>>,
}

impl Default for TagDeriver {
    fn default() -> Self {
        Self {
            derive_count: Arc::new(AtomicU64::new(0)),
            fixed_delay: None,
            max_random_delay_us: 0,
            fail_on: None,
            panic_on: None,
            threads_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl FeatureDeriver<u64> for TagDeriver {
    type Derived = u64;

    fn derive(&self, tag: &u64) -> Result<u64> {
        self.threads_seen
            .lock()
            .unwrap()
            .push(thread::current().name().map(str::to_string));

        if let Some(delay) = self.fixed_delay {
            thread::sleep(delay);
        }
        if self.max_random_delay_us > 0 {
            let us = rand::rng().random_range(0..self.max_random_delay_us);
            thread::sleep(Duration::from_micros(us));
        }
        if self.panic_on == Some(*tag) {
            panic!("deriver panicked on tag {}", tag);
        }
        if self.fail_on == Some(*tag) {
            bail!("cannot derive features for tag {}", tag);
        }

        self.derive_count.fetch_add(1, Ordering::SeqCst);
        Ok(derived_for(*tag))
    }
}

/// Records every `(tag, derived)` pair it is asked to train on.
#[derive(Clone, Default)]
pub struct RecordingTrainer {
    pub seen: Arc<Mutex<Vec<u64>>>,
    pub mismatches: Arc<AtomicUsize>,
    pub fail_on: Option<u64>,
    /// Largest number of derivations finished past the minibatch being trained.
    pub max_lead: Arc<AtomicU64>,
    pub derive_count: Option<Arc<AtomicU64>>,
}

impl RecordingTrainer {
    pub fn watching(deriver: &TagDeriver) -> Self {
        Self {
            derive_count: Some(deriver.derive_count.clone()),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

impl CoreTrainer<u64, u64> for RecordingTrainer {
    fn train(&mut self, tag: u64, derived: u64) -> Result<()> {
        if derived != derived_for(tag) {
            self.mismatches.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(count) = &self.derive_count {
            let trained = self.seen.lock().unwrap().len() as u64;
            let lead = count.load(Ordering::SeqCst).saturating_sub(trained + 1);
            self.max_lead.fetch_max(lead, Ordering::SeqCst);
        }
        if self.fail_on == Some(tag) {
            bail!("training diverged on tag {}", tag);
        }
        self.seen.lock().unwrap().push(tag);
        Ok(())
    }
}
