pub mod error;
pub mod pipeline;
pub mod rnnlm;

pub use error::PipelineError;
pub use pipeline::{CoreTrainer, FeatureDeriver, Trainer, TrainerConfig};
pub use rnnlm::{RnnlmDerived, RnnlmDeriverConfig, RnnlmExample, RnnlmFeatureDeriver, SparseMatrix};
