use rayon::prelude::*;

use crate::math::{l2_norm, normalize};
use crate::CoresetError;

/// Immutable view over N input vectors of fixed dimension D.
///
/// Construction validates the rows and precomputes the per-vector norms, the
/// elementwise sum of all vectors (the approximation target) and its norm.
/// Every downstream component reads from this set; nothing mutates it, so a
/// single `VectorSet` can back any number of coreset builders.
#[derive(Debug, Clone)]
pub struct VectorSet {
    rows: Vec<Vec<f64>>,
    dim: usize,
    norms: Vec<f64>,
    sum: Vec<f64>,
    sum_norm: f64,
    norm_total: f64,
}

impl VectorSet {
    /// Build a set from row vectors.
    ///
    /// Fails if the rows do not share a single dimension or contain
    /// non-finite entries. An empty row collection is a valid, degenerate
    /// set.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, CoresetError> {
        let dim = rows.first().map(|row| row.len()).unwrap_or(0);
        for row in &rows {
            if row.len() != dim {
                return Err(CoresetError::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                });
            }
            if row.iter().any(|value| !value.is_finite()) {
                return Err(CoresetError::InvalidInput(
                    "vector entries must be finite numbers",
                ));
            }
        }

        let norms: Vec<f64> = rows.par_iter().map(|row| l2_norm(row)).collect();
        let mut sum = vec![0.0f64; dim];
        for row in &rows {
            for (acc, value) in sum.iter_mut().zip(row.iter()) {
                *acc += value;
            }
        }
        let sum_norm = l2_norm(&sum);
        let norm_total = norms.iter().sum();

        Ok(Self {
            rows,
            dim,
            norms,
            sum,
            sum_norm,
            norm_total,
        })
    }

    /// Number of vectors in the set.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check whether the set holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dimension shared by every vector.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The `i`-th input vector.
    pub fn vector(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    /// Norm of the `i`-th input vector.
    pub fn norm(&self, i: usize) -> f64 {
        self.norms[i]
    }

    /// Elementwise sum over all vectors, the fixed approximation target.
    pub fn sum(&self) -> &[f64] {
        &self.sum
    }

    /// Norm of the vector sum.
    pub fn sum_norm(&self) -> f64 {
        self.sum_norm
    }

    /// Sum of the per-vector norms.
    pub fn norm_total(&self) -> f64 {
        self.norm_total
    }

    /// Unit directions of the rows with nonzero norm, paired with their
    /// original row indices. Zero rows have no direction and are skipped.
    pub(crate) fn unit_directions(&self) -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut dirs = Vec::with_capacity(self.rows.len());
        let mut labels = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            if self.norms[i] <= 0.0 {
                continue;
            }
            let mut dir = row.clone();
            if normalize(&mut dir) > 0.0 {
                dirs.push(dir);
                labels.push(i);
            }
        }
        (dirs, labels)
    }
}
