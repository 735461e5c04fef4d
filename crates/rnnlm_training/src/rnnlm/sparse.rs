//! Sparse word-feature matrix in compressed-row (CSR) form.
//!
//! Row `w` holds the non-zero features of word `w`. The derivation thread only
//! needs two operations on it: selecting the rows of the words active in a
//! minibatch, and transposing.

use anyhow::{anyhow, bail, ensure, Context, Result};
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseMatrix {
    num_rows: usize,
    num_cols: usize,
    // row_ptr[r]..row_ptr[r + 1] indexes the entries of row r.
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f32>,
}

impl SparseMatrix {
    /// Builds a matrix from per-row `(column, value)` lists.
    ///
    /// Entries within a row are sorted by column; duplicate columns are rejected.
    pub fn from_rows(num_cols: usize, rows: Vec<Vec<(usize, f32)>>) -> Result<Self> {
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);

        for (r, mut row) in rows.into_iter().enumerate() {
            row.sort_by_key(|&(c, _)| c);
            for pair in row.windows(2) {
                ensure!(
                    pair[0].0 != pair[1].0,
                    "Row {} has column {} more than once",
                    r,
                    pair[0].0
                );
            }
            for (c, v) in row {
                ensure!(
                    c < num_cols,
                    "Row {} has column {} but the matrix has {} columns",
                    r,
                    c,
                    num_cols
                );
                col_idx.push(c);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }

        Ok(Self {
            num_rows: row_ptr.len() - 1,
            num_cols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Reads the sparse word-feature text format.
    ///
    /// Each line is a word index followed by `(feature-index, value)` pairs for the
    /// non-zero features, e.g. `1  30 1.0 516 1.0`. Words must appear in order
    /// `0..vocab_size`, one line each. The column count is one past the largest
    /// feature index seen.
    pub fn read_word_features<R: BufRead>(reader: R, vocab_size: usize) -> Result<Self> {
        let mut rows = Vec::with_capacity(vocab_size);
        let mut num_cols = 0;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read line {}", line_no + 1))?;
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            let word: usize = word
                .parse()
                .with_context(|| format!("Line {}: bad word index {:?}", line_no + 1, word))?;
            ensure!(
                word == rows.len(),
                "Line {}: expected word {}, found {}",
                line_no + 1,
                rows.len(),
                word
            );

            let rest: Vec<&str> = fields.collect();
            if rest.len() % 2 != 0 {
                bail!(
                    "Line {}: features must come in (index, value) pairs",
                    line_no + 1
                );
            }
            let mut row = Vec::with_capacity(rest.len() / 2);
            for pair in rest.chunks(2) {
                let feature: usize = pair[0].parse().with_context(|| {
                    format!("Line {}: bad feature index {:?}", line_no + 1, pair[0])
                })?;
                let value: f32 = pair[1].parse().with_context(|| {
                    format!("Line {}: bad feature value {:?}", line_no + 1, pair[1])
                })?;
                let end = feature.checked_add(1).with_context(|| {
                    format!("Line {}: feature index {} is too large", line_no + 1, feature)
                })?;
                num_cols = num_cols.max(end);
                row.push((feature, value));
            }
            rows.push(row);
        }

        ensure!(
            rows.len() == vocab_size,
            "Word-feature file has {} words, expected {}",
            rows.len(),
            vocab_size
        );
        Self::from_rows(num_cols, rows)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Number of stored (non-zero) entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Returns the `(column, value)` entries of row `r`.
    pub fn row(&self, r: usize) -> Result<impl Iterator<Item = (usize, f32)> + '_> {
        ensure!(
            r < self.num_rows,
            "Row {} out of range for matrix with {} rows",
            r,
            self.num_rows
        );
        let range = self.row_ptr[r]..self.row_ptr[r + 1];
        Ok(self.col_idx[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied()))
    }

    /// Returns a matrix made of the listed rows, in the given order.
    pub fn select_rows(&self, rows: &[u32]) -> Result<Self> {
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);

        for &r in rows {
            let r = r as usize;
            let (start, end) = self
                .row_ptr
                .get(r)
                .zip(self.row_ptr.get(r + 1))
                .map(|(&s, &e)| (s, e))
                .ok_or_else(|| {
                    anyhow!(
                        "Row {} out of range for matrix with {} rows",
                        r,
                        self.num_rows
                    )
                })?;
            col_idx.extend_from_slice(&self.col_idx[start..end]);
            values.extend_from_slice(&self.values[start..end]);
            row_ptr.push(col_idx.len());
        }

        Ok(Self {
            num_rows: rows.len(),
            num_cols: self.num_cols,
            row_ptr,
            col_idx,
            values,
        })
    }

    pub fn transpose(&self) -> Self {
        // Counting sort on column index.
        let mut row_ptr = vec![0usize; self.num_cols + 1];
        for &c in &self.col_idx {
            row_ptr[c + 1] += 1;
        }
        for c in 0..self.num_cols {
            row_ptr[c + 1] += row_ptr[c];
        }

        let mut next = row_ptr.clone();
        let mut col_idx = vec![0usize; self.nnz()];
        let mut values = vec![0f32; self.nnz()];
        for r in 0..self.num_rows {
            for k in self.row_ptr[r]..self.row_ptr[r + 1] {
                let c = self.col_idx[k];
                let slot = next[c];
                col_idx[slot] = r;
                values[slot] = self.values[k];
                next[c] += 1;
            }
        }

        Self {
            num_rows: self.num_cols,
            num_cols: self.num_rows,
            row_ptr,
            col_idx,
            values,
        }
    }
}
