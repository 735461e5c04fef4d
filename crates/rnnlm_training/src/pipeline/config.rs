//! src/pipeline/config.rs
//!
//! Configuration for the lookahead trainer.
//!
//! Example:
//! ```ignore
//! let config = TrainerConfig::builder()
//!     .worker_name("rnnlm-derive-0")
//!     .log_interval(500)
//!     .build();
//! ```

use anyhow::Result;

use crate::error::PipelineError;

/// Default name of the background derivation thread.
pub const DEFAULT_WORKER_NAME: &str = "rnnlm-derive";

/// Default number of minibatches between progress messages.
pub const DEFAULT_LOG_INTERVAL: usize = 1000;

/// Configuration for [`Trainer`](super::Trainer).
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Name given to the background derivation thread.
    pub worker_name: String,
    /// Log a progress line every `log_interval` minibatches (0 = never).
    pub log_interval: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            log_interval: DEFAULT_LOG_INTERVAL,
        }
    }
}

impl TrainerConfig {
    pub fn builder() -> TrainerConfigBuilder {
        TrainerConfigBuilder::default()
    }

    /// Checks the configuration before any thread is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.worker_name.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "worker_name must not be empty".to_string(),
            )
            .into());
        }
        // std::thread::Builder rejects names with interior NUL bytes.
        if self.worker_name.contains('\0') {
            return Err(PipelineError::Configuration(format!(
                "worker_name {:?} contains a NUL byte",
                self.worker_name
            ))
            .into());
        }
        Ok(())
    }
}

/// Builder for TrainerConfig with method chaining
#[derive(Default)]
pub struct TrainerConfigBuilder {
    config: TrainerConfig,
}

impl TrainerConfigBuilder {
    /// Set the derivation thread name
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_name = name.into();
        self
    }

    /// Set the progress log cadence.
    ///
    /// - `0`: no progress lines, only lifecycle events are logged.
    pub fn log_interval(mut self, interval: usize) -> Self {
        self.config.log_interval = interval;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> TrainerConfig {
        self.config
    }
}
