//! ## Triangular packing of pairwise results
//! Results for the `N * (N - 1) / 2` unordered pairs `(i, j)`, `i < j`, are
//! stored row after row in one flat array:
//!
//! ```text
//! (0,1) (0,2) ... (0,N-1) (1,2) ... (1,N-1) ... (N-2,N-1)
//! ```
//!
//! Row `i` starts at `i * (2N - i - 1) / 2`, so `(i, j)` lives at that offset
//! plus `j - (i + 1)`.

use crate::error::{Error, Result};

/// Return number of unordered pairs among `n` sketches
#[inline]
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Return flat offset of unordered pair `(i, j)` among `n` sketches.
///
/// The mapping is symmetric in `i` and `j`. The result is meaningless when
/// `i == j` or either index is `>= n`.
#[inline]
pub fn pair_index(i: usize, j: usize, n: usize) -> usize {
    let (a, b) = if i < j { (i, j) } else { (j, i) };
    a * (2 * n - a - 1) / 2 + b - (a + 1)
}

/// Cardinality estimates of all unordered sketch pairs in triangular layout.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize))]
pub struct PairwiseEstimates {
    sketch_count: usize,
    values: Vec<f64>,
}

impl PairwiseEstimates {
    /// Create new instance from packed `values` of `sketch_count` sketches,
    /// failing unless `values` holds exactly one value per pair.
    pub fn try_new(sketch_count: usize, values: Vec<f64>) -> Result<Self> {
        let expected = sketch_count
            .checked_mul(sketch_count.saturating_sub(1))
            .map(|twice| twice / 2);
        if expected != Some(values.len()) {
            return Err(Error::PairCount {
                sketch_count,
                len: values.len(),
            });
        }
        Ok(Self {
            sketch_count,
            values,
        })
    }

    /// Create new instance from packed `values` produced inside the crate.
    ///
    /// # Panics
    /// Panics if `values` does not hold exactly one value per pair.
    pub(crate) fn new(sketch_count: usize, values: Vec<f64>) -> Self {
        assert_eq!(
            values.len(),
            pair_count(sketch_count),
            "expected one value per pair of {sketch_count} sketches"
        );
        Self {
            sketch_count,
            values,
        }
    }

    /// Return estimate for pair `(i, j)` in any order
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if i == j || i >= self.sketch_count || j >= self.sketch_count {
            return None;
        }
        self.values
            .get(pair_index(i, j, self.sketch_count))
            .copied()
    }

    /// Iterate over `((i, j), estimate)` in packed order
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        let n = self.sketch_count;
        (0..n)
            .flat_map(move |i| (i + 1..n).map(move |j| (i, j)))
            .zip(self.values.iter().copied())
    }

    #[inline]
    pub fn sketch_count(&self) -> usize {
        self.sketch_count
    }

    /// Return number of pairs
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }

    /// Derive pairwise Jaccard similarity from union estimates and per-sketch
    /// estimates `sizes`, using `|A ∩ B| = |A| + |B| - |A ∪ B|`.
    ///
    /// Values are clamped to `[0, 1]` since independent estimates can overshoot.
    ///
    /// # Panics
    /// Panics if `sizes` does not hold one estimate per sketch.
    pub fn jaccard(&self, sizes: &[f64]) -> PairwiseEstimates {
        assert_eq!(sizes.len(), self.sketch_count);
        let values = self
            .iter()
            .map(|((i, j), union)| {
                let intersection = sizes[i] + sizes[j] - union;
                (intersection / union).clamp(0.0, 1.0)
            })
            .collect();
        PairwiseEstimates {
            sketch_count: self.sketch_count,
            values,
        }
    }
}
