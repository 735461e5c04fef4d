use anyhow::{ensure, Result};

/// The `RnnlmExample` struct is one RNNLM training minibatch.
///
/// It holds `num_chunks` parallel word sequences of `chunk_length` positions each.
/// Per-position arrays are laid out time-major: position `t` of chunk `n` is at
/// index `t * num_chunks + n`.
///
/// When the minibatch is *sampled*, the output layer is only evaluated on a
/// subset of the vocabulary: every group of `sample_group_size` consecutive time
/// steps shares `num_samples` sampled words, stored in `sampled_words`.
///
/// # Examples
/// Two chunks of length 3 without sampling:
/// - `input_words`    -> `[a0, b0, a1, b1, a2, b2]`
/// - `output_words`   -> `[a1, b1, a2, b2, a3, b3]`
/// - `output_weights` -> `[1.0; 6]` (0.0 marks padding)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RnnlmExample {
    /// Vocabulary size the word ids refer to.
    pub vocab_size: usize,
    pub num_chunks: usize,
    pub chunk_length: usize,
    /// Time steps sharing one set of sampled words (sampled minibatches only).
    pub sample_group_size: usize,
    /// Sampled words per group (sampled minibatches only).
    pub num_samples: usize,
    pub input_words: Vec<u32>,
    pub output_words: Vec<u32>,
    pub output_weights: Vec<f32>,
    /// Empty when the minibatch is not sampled.
    pub sampled_words: Vec<u32>,
}

impl RnnlmExample {
    /// Builds an unsampled minibatch from chunk-major `(input, output, weight)` rows.
    ///
    /// All chunks must have the same length.
    pub fn from_chunks(vocab_size: usize, chunks: &[Vec<(u32, u32, f32)>]) -> Result<Self> {
        ensure!(!chunks.is_empty(), "Minibatch must have at least one chunk");
        let num_chunks = chunks.len();
        let chunk_length = chunks[0].len();
        ensure!(
            chunks.iter().all(|c| c.len() == chunk_length),
            "All chunks must have length {}",
            chunk_length
        );

        let total = num_chunks * chunk_length;
        let mut example = Self {
            vocab_size,
            num_chunks,
            chunk_length,
            input_words: Vec::with_capacity(total),
            output_words: Vec::with_capacity(total),
            output_weights: Vec::with_capacity(total),
            ..Self::default()
        };
        for t in 0..chunk_length {
            for chunk in chunks {
                let (input, output, weight) = chunk[t];
                example.input_words.push(input);
                example.output_words.push(output);
                example.output_weights.push(weight);
            }
        }
        Ok(example)
    }

    /// Attaches sampled words, turning this into a sampled minibatch.
    ///
    /// `sampled_words` holds `num_samples` words for each group of
    /// `sample_group_size` time steps.
    pub fn with_samples(
        mut self,
        sample_group_size: usize,
        num_samples: usize,
        sampled_words: Vec<u32>,
    ) -> Self {
        self.sample_group_size = sample_group_size;
        self.num_samples = num_samples;
        self.sampled_words = sampled_words;
        self
    }

    pub fn is_sampled(&self) -> bool {
        !self.sampled_words.is_empty()
    }

    /// Number of (chunk, time) positions.
    pub fn num_positions(&self) -> usize {
        self.num_chunks * self.chunk_length
    }

    /// Sum of output weights, i.e. the number of real (non-padding) predictions.
    pub fn total_weight(&self) -> f64 {
        self.output_weights.iter().map(|&w| w as f64).sum()
    }

    /// Checks that array sizes agree with the declared shape and that every word
    /// id is below `vocab_size`.
    pub fn check_sane(&self) -> Result<()> {
        ensure!(
            self.num_chunks > 0 && self.chunk_length > 0,
            "Empty minibatch ({} chunks of length {})",
            self.num_chunks,
            self.chunk_length
        );
        let n = self.num_positions();
        ensure!(
            self.input_words.len() == n
                && self.output_words.len() == n
                && self.output_weights.len() == n,
            "Expected {} positions, got {} inputs, {} outputs, {} weights",
            n,
            self.input_words.len(),
            self.output_words.len(),
            self.output_weights.len()
        );
        ensure!(
            self.output_weights.iter().all(|&w| w >= 0.0 && w.is_finite()),
            "Output weights must be finite and non-negative"
        );

        if self.is_sampled() {
            ensure!(
                self.sample_group_size > 0 && self.chunk_length % self.sample_group_size == 0,
                "chunk_length {} is not a multiple of sample_group_size {}",
                self.chunk_length,
                self.sample_group_size
            );
            let expected = (self.chunk_length / self.sample_group_size) * self.num_samples;
            ensure!(
                self.sampled_words.len() == expected,
                "Expected {} sampled words, got {}",
                expected,
                self.sampled_words.len()
            );
        }

        let vocab = self.vocab_size;
        for (name, words) in [
            ("input", &self.input_words),
            ("output", &self.output_words),
            ("sampled", &self.sampled_words),
        ] {
            if let Some(&w) = words.iter().find(|&&w| w as usize >= vocab) {
                anyhow::bail!("{} word {} out of range for vocabulary of {}", name, w, vocab);
            }
        }
        Ok(())
    }

    /// Sorted, de-duplicated list of every word the minibatch mentions.
    pub fn active_words(&self) -> Vec<u32> {
        let mut words: Vec<u32> = self
            .input_words
            .iter()
            .chain(&self.output_words)
            .chain(&self.sampled_words)
            .copied()
            .collect();
        words.sort_unstable();
        words.dedup();
        words
    }

    /// Rewrites word ids as indexes into `active_words()` and shrinks
    /// `vocab_size` to match. Returns the active words.
    pub fn renumber(&mut self) -> Vec<u32> {
        let active = self.active_words();
        for words in [
            &mut self.input_words,
            &mut self.output_words,
            &mut self.sampled_words,
        ] {
            words.iter_mut().for_each(|w| *w = active_index(&active, *w));
        }
        self.vocab_size = active.len();
        active
    }

    /// Copies `words` renumbered as indexes into the sorted `active` list.
    pub fn renumbered(active: &[u32], words: &[u32]) -> Vec<u32> {
        words.iter().map(|&w| active_index(active, w)).collect()
    }
}

// Every word is in `active` when it came from `active_words()`.
fn active_index(active: &[u32], w: u32) -> u32 {
    active.binary_search(&w).map_or(w, |i| i as u32)
}
