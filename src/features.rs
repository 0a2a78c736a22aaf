use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A row of `(column, value)` pairs sorted by column.
pub type SparseRow = Vec<(usize, f64)>;

/// A row-major sparse matrix with a fixed column count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    n_cols: usize,
    rows: Vec<SparseRow>,
}

impl SparseMatrix {
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            rows: Vec::new(),
        }
    }

    /// Builds a matrix from dense rows, dropping zero entries.
    pub fn from_dense(n_cols: usize, dense: &[Vec<f64>]) -> Result<Self> {
        let mut matrix = Self::new(n_cols);
        for row in dense {
            if row.len() != n_cols {
                return Err(Error::FeatureWidth {
                    expected: n_cols,
                    actual: row.len(),
                });
            }
            matrix.rows.push(
                row.iter()
                    .copied()
                    .enumerate()
                    .filter(|&(_, v)| v != 0.0)
                    .collect(),
            );
        }
        Ok(matrix)
    }

    /// Appends a row. Entries must be sorted by column and within bounds.
    pub fn push_row(&mut self, row: SparseRow) {
        debug_assert!(row.windows(2).all(|w| w[0].0 < w[1].0));
        debug_assert!(row.last().map_or(true, |&(col, _)| col < self.n_cols));
        self.rows.push(row);
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    pub fn row(&self, idx: usize) -> &[(usize, f64)] {
        &self.rows[idx]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[(usize, f64)]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut SparseRow> {
        self.rows.iter_mut()
    }

    /// Dense copy of one row.
    pub fn dense_row(&self, idx: usize) -> Vec<f64> {
        let mut dense = vec![0.0; self.n_cols];
        for &(col, value) in &self.rows[idx] {
            dense[col] = value;
        }
        dense
    }

    /// Concatenates `other`'s columns to the right of `self`'s, row by row.
    pub fn hstack(&self, other: &SparseMatrix) -> Result<SparseMatrix> {
        if self.n_rows() != other.n_rows() {
            return Err(Error::ShapeMismatch {
                left: self.n_rows(),
                right: other.n_rows(),
            });
        }

        let offset = self.n_cols;
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(left, right)| {
                left.iter()
                    .copied()
                    .chain(right.iter().map(|&(col, v)| (col + offset, v)))
                    .collect()
            })
            .collect();

        Ok(SparseMatrix {
            n_cols: self.n_cols + other.n_cols,
            rows,
        })
    }
}

/// Joins the lexical and topic feature blocks into the classifier's input.
/// Both blocks must describe the same documents in the same order.
pub fn combine(lexical: &SparseMatrix, topics: &SparseMatrix) -> Result<SparseMatrix> {
    lexical.hstack(topics)
}
