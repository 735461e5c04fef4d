//! RNNLM minibatches and the feature deriver that runs on the derivation thread.
//!
//! - `example`: the `RnnlmExample` minibatch, its sanity check and renumbering
//! - `sparse`: CSR word-feature matrix (row selection, transpose, text reader)
//! - `derived`: `RnnlmDerived` and `RnnlmFeatureDeriver`

pub mod derived;
pub mod example;
pub mod sparse;

pub use derived::{
    RnnlmDerived, RnnlmDeriverConfig, RnnlmDeriverConfigBuilder, RnnlmFeatureDeriver, VocabSize,
};
pub use example::RnnlmExample;
pub use sparse::SparseMatrix;
