//! Derived data of an RNNLM minibatch, computed on the derivation thread.
//!
//! For a sampled minibatch the output layer only covers the *active words*, so
//! the word ids are renumbered into that list and, when sparse word features are
//! in use, the feature rows of the active words are cut out and transposed.
//! None of this touches the model being trained, which is what allows it to run
//! concurrently with the training step.

use anyhow::{Context, Result};
use log::debug;
use std::sync::{Arc, OnceLock};

use super::example::RnnlmExample;
use super::sparse::SparseMatrix;
use crate::error::PipelineError;
use crate::pipeline::FeatureDeriver;

/// Read-only access to the full vocabulary size.
pub trait VocabSize {
    fn vocab_size(&self) -> usize;
}

/// Derived data for one [`RnnlmExample`].
#[derive(Debug, Clone, Default)]
pub struct RnnlmDerived {
    /// Vocabulary size the word ids below refer to: the active-word count for
    /// sampled minibatches, the full vocabulary otherwise.
    pub vocab_size: usize,
    /// Renumbered word arrays of a sampled minibatch. Empty when unsampled, in
    /// which case the minibatch's own arrays are used as they are.
    pub input_words: Vec<u32>,
    pub output_words: Vec<u32>,
    pub sampled_words: Vec<u32>,
    /// Original ids of the active words (sampled minibatches only).
    pub active_words: Option<Vec<u32>>,
    /// Word-feature rows of the active words (sampled, with word features).
    pub active_word_features: Option<SparseMatrix>,
    /// Transpose of `active_word_features`.
    pub active_word_features_trans: Option<SparseMatrix>,
    /// Transpose of the full word-feature matrix (unsampled, with word features).
    /// Computed once and shared between minibatches.
    pub word_features_trans: Option<Arc<SparseMatrix>>,
}

/// Configuration for [`RnnlmFeatureDeriver`]
#[derive(Debug, Clone, Default)]
pub struct RnnlmDeriverConfig {
    /// Full vocabulary size (required)
    pub vocab_size: Option<usize>,
    /// Sparse word features, one row per word (optional)
    pub word_features: Option<SparseMatrix>,
}

impl RnnlmDeriverConfig {
    pub fn builder() -> RnnlmDeriverConfigBuilder {
        RnnlmDeriverConfigBuilder::default()
    }
}

/// Builder for RnnlmDeriverConfig with method chaining
#[derive(Default)]
pub struct RnnlmDeriverConfigBuilder {
    config: RnnlmDeriverConfig,
}

impl RnnlmDeriverConfigBuilder {
    pub fn vocab_size(mut self, vocab_size: usize) -> Self {
        self.config.vocab_size = Some(vocab_size);
        self
    }

    /// Use sparse word features; the embedding matrix is then a feature embedding.
    pub fn word_features(mut self, features: SparseMatrix) -> Self {
        self.config.word_features = Some(features);
        self
    }

    pub fn build(self) -> RnnlmDeriverConfig {
        self.config
    }
}

/// [`FeatureDeriver`] for [`RnnlmExample`] minibatches.
#[derive(Debug)]
pub struct RnnlmFeatureDeriver {
    vocab_size: usize,
    word_features: Option<Arc<SparseMatrix>>,
    word_features_trans: OnceLock<Arc<SparseMatrix>>,
}

impl RnnlmFeatureDeriver {
    pub fn new(config: RnnlmDeriverConfig) -> Result<Self> {
        let vocab_size = match config.vocab_size {
            Some(v) if v > 0 => v,
            Some(_) => {
                return Err(PipelineError::Configuration(
                    "vocab_size must be greater than zero".to_string(),
                )
                .into())
            }
            None => {
                return Err(
                    PipelineError::Configuration("vocab_size is required".to_string()).into(),
                )
            }
        };

        if let Some(features) = &config.word_features {
            if features.num_rows() != vocab_size {
                return Err(PipelineError::Configuration(format!(
                    "word features have {} rows but the vocabulary has {} words",
                    features.num_rows(),
                    vocab_size
                ))
                .into());
            }
            debug!(
                "using {} sparse word features ({} non-zeros)",
                features.num_cols(),
                features.nnz()
            );
        }

        Ok(Self {
            vocab_size,
            word_features: config.word_features.map(Arc::new),
            word_features_trans: OnceLock::new(),
        })
    }

    pub fn has_word_features(&self) -> bool {
        self.word_features.is_some()
    }

    fn full_features_trans(&self, features: &SparseMatrix) -> Arc<SparseMatrix> {
        self.word_features_trans
            .get_or_init(|| {
                debug!("transposing the full word-feature matrix");
                Arc::new(features.transpose())
            })
            .clone()
    }
}

impl VocabSize for RnnlmFeatureDeriver {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

impl FeatureDeriver<RnnlmExample> for RnnlmFeatureDeriver {
    type Derived = RnnlmDerived;

    fn derive(&self, minibatch: &RnnlmExample) -> Result<RnnlmDerived> {
        minibatch.check_sane().context("Minibatch failed sanity check")?;
        anyhow::ensure!(
            minibatch.vocab_size == self.vocab_size(),
            "Minibatch vocabulary of {} does not match the model vocabulary of {}",
            minibatch.vocab_size,
            self.vocab_size()
        );

        if !minibatch.is_sampled() {
            return Ok(RnnlmDerived {
                vocab_size: self.vocab_size(),
                word_features_trans: self
                    .word_features
                    .as_deref()
                    .map(|features| self.full_features_trans(features)),
                ..RnnlmDerived::default()
            });
        }

        let active_words = minibatch.active_words();
        let (active_word_features, active_word_features_trans) = match &self.word_features {
            Some(features) => {
                let rows = features
                    .select_rows(&active_words)
                    .context("Failed to select word-feature rows of the active words")?;
                let trans = rows.transpose();
                (Some(rows), Some(trans))
            }
            None => (None, None),
        };

        Ok(RnnlmDerived {
            vocab_size: active_words.len(),
            input_words: RnnlmExample::renumbered(&active_words, &minibatch.input_words),
            output_words: RnnlmExample::renumbered(&active_words, &minibatch.output_words),
            sampled_words: RnnlmExample::renumbered(&active_words, &minibatch.sampled_words),
            active_words: Some(active_words),
            active_word_features,
            active_word_features_trans,
            word_features_trans: None,
        })
    }
}

#[cfg(test)]
mod derived_test {
    use super::*;

    fn features(vocab: usize) -> SparseMatrix {
        // Word w has feature (w % 3) = 1.0 and feature 3 = w as f32.
        SparseMatrix::from_rows(
            4,
            (0..vocab)
                .map(|w| vec![(w % 3, 1.0), (3, w as f32)])
                .collect(),
        )
        .unwrap()
    }

    fn sampled_example() -> RnnlmExample {
        RnnlmExample::from_chunks(10, &[vec![(1, 5, 1.0), (5, 8, 1.0)]])
            .unwrap()
            .with_samples(2, 2, vec![8, 2])
    }

    #[test]
    fn test_config_errors() {
        let missing = RnnlmFeatureDeriver::new(RnnlmDeriverConfig::default()).unwrap_err();
        assert!(matches!(
            missing.downcast_ref::<PipelineError>(),
            Some(PipelineError::Configuration(_))
        ));

        let zero = RnnlmFeatureDeriver::new(RnnlmDeriverConfig::builder().vocab_size(0).build());
        assert!(zero.is_err());

        let mismatched = RnnlmFeatureDeriver::new(
            RnnlmDeriverConfig::builder()
                .vocab_size(10)
                .word_features(features(9))
                .build(),
        );
        assert!(mismatched.is_err());
    }

    #[test]
    fn test_unsampled_without_features() {
        let deriver =
            RnnlmFeatureDeriver::new(RnnlmDeriverConfig::builder().vocab_size(10).build()).unwrap();
        assert_eq!(deriver.vocab_size(), 10);
        assert!(!deriver.has_word_features());

        let eg = RnnlmExample::from_chunks(10, &[vec![(1, 5, 1.0)]]).unwrap();
        let derived = deriver.derive(&eg).unwrap();
        assert_eq!(derived.vocab_size, 10);
        // Unsampled word arrays are not copied; the trainer owns the minibatch.
        assert!(derived.input_words.is_empty());
        assert!(derived.output_words.is_empty());
        assert!(derived.sampled_words.is_empty());
        assert!(derived.active_words.is_none());
        assert!(derived.word_features_trans.is_none());
    }

    #[test]
    fn test_unsampled_shares_one_transpose() {
        let deriver = RnnlmFeatureDeriver::new(
            RnnlmDeriverConfig::builder()
                .vocab_size(10)
                .word_features(features(10))
                .build(),
        )
        .unwrap();
        let eg = RnnlmExample::from_chunks(10, &[vec![(1, 5, 1.0)]]).unwrap();

        let first = deriver.derive(&eg).unwrap().word_features_trans.unwrap();
        let second = deriver.derive(&eg).unwrap().word_features_trans.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.num_rows(), 4);
        assert_eq!(first.num_cols(), 10);
    }

    #[test]
    fn test_sampled_with_features() {
        let deriver = RnnlmFeatureDeriver::new(
            RnnlmDeriverConfig::builder()
                .vocab_size(10)
                .word_features(features(10))
                .build(),
        )
        .unwrap();
        let eg = sampled_example();
        let derived = deriver.derive(&eg).unwrap();

        assert_eq!(derived.active_words, Some(vec![1, 2, 5, 8]));
        assert_eq!(derived.vocab_size, 4);
        assert_eq!(derived.input_words, vec![0, 2]);
        assert_eq!(derived.output_words, vec![2, 3]);
        assert_eq!(derived.sampled_words, vec![3, 1]);

        let rows = derived.active_word_features.unwrap();
        assert_eq!(rows.num_rows(), 4);
        // Row 2 is word 5: feature 2 and feature 3 = 5.0.
        assert_eq!(rows.row(2).unwrap().collect::<Vec<_>>(), vec![(2, 1.0), (3, 5.0)]);
        assert_eq!(derived.active_word_features_trans.unwrap(), rows.transpose());
        assert!(derived.word_features_trans.is_none());

        // The submitted minibatch itself is left untouched.
        assert_eq!(eg.input_words, vec![1, 5]);
    }

    #[test]
    fn test_out_of_range_word_is_a_failure() {
        let deriver =
            RnnlmFeatureDeriver::new(RnnlmDeriverConfig::builder().vocab_size(10).build()).unwrap();
        let mut eg = RnnlmExample::from_chunks(10, &[vec![(1, 5, 1.0)]]).unwrap();
        eg.output_words[0] = 12;
        assert!(deriver.derive(&eg).is_err());

        let too_big = RnnlmExample::from_chunks(20, &[vec![(1, 5, 1.0)]]).unwrap();
        assert!(deriver.derive(&too_big).is_err());
    }

    #[test]
    fn test_smaller_minibatch_vocabulary_is_a_failure() {
        let deriver =
            RnnlmFeatureDeriver::new(RnnlmDeriverConfig::builder().vocab_size(10).build()).unwrap();
        let too_small = RnnlmExample::from_chunks(8, &[vec![(1, 5, 1.0)]]).unwrap();
        let err = deriver.derive(&too_small).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
