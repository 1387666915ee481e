//! ## Multi-core all-pairs engine
//! For every unordered pair of sketches in a batch, merges registers by
//! register-wise maximum into a histogram. The outer loop over the left sketch
//! `i` runs sequentially; the inner loop over `j > i` is spread across rayon
//! workers, one unit of work per `j`, each writing its own output region.

use std::sync::Arc;
use std::time::Instant;

use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};
use crate::histogram::{Histogram, BINS};
use crate::pairs::{pair_count, PairwiseEstimates};
use crate::sketch::{Precision, SketchBatch};

/// Union histograms of all pairs of a batch in dense `(i, j)` block layout.
///
/// Block `(i, j)` starts at `(i * N + j) * width` and holds the first `width`
/// bins of the union histogram, `width = 64 - P + 2`. Only blocks with
/// `i < j` are populated; the others stay zeroed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize))]
pub struct UnionHistograms {
    precision: Precision,
    sketch_count: usize,
    width: usize,
    data: Vec<u32>,
}

impl UnionHistograms {
    /// Rebuild dense histograms from their parts, checking `width` matches
    /// `precision` and `data` holds exactly `N * N` blocks.
    pub fn try_from_parts(
        precision: Precision,
        sketch_count: usize,
        width: usize,
        data: Vec<u32>,
    ) -> Result<Self> {
        let expected = sketch_count
            .checked_mul(sketch_count)
            .and_then(|blocks| blocks.checked_mul(width));
        if width != precision.histogram_width() || expected != Some(data.len()) {
            return Err(Error::HistogramLayout {
                sketch_count,
                width,
                len: data.len(),
                precision: precision.get(),
            });
        }
        Ok(Self {
            precision,
            sketch_count,
            width,
            data,
        })
    }

    /// Return number of bins stored per pair
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn sketch_count(&self) -> usize {
        self.sketch_count
    }

    #[inline]
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Return raw dense buffer
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    /// Return stored bins of pair `(i, j)` in any order
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Option<&[u32]> {
        let n = self.sketch_count;
        if i == j || i >= n || j >= n {
            return None;
        }
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        let start = (i * n + j) * self.width;
        self.data.get(start..start + self.width)
    }

    /// Return union histogram of pair `(i, j)` in any order
    pub fn histogram(&self, i: usize, j: usize) -> Option<Histogram> {
        self.get(i, j).map(|bins| {
            let mut counts = [0u32; BINS];
            for (count, &bin) in counts.iter_mut().zip(bins) {
                *count = bin;
            }
            Histogram::from_counts(counts)
        })
    }

    /// Estimate union cardinality of every pair, packed triangularly
    pub fn estimates(&self) -> PairwiseEstimates {
        let n = self.sketch_count;
        let values = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
            .map(|(i, j)| match self.histogram(i, j) {
                Some(hist) => hist.estimate(self.precision),
                None => f64::NAN,
            })
            .collect();
        PairwiseEstimates::new(n, values)
    }
}

/// Compute union histograms of all sketch pairs of `batch` on the current rayon pool
pub fn union_histograms(batch: &SketchBatch<'_>) -> UnionHistograms {
    let n = batch.len();
    let precision = batch.precision();
    let width = precision.histogram_width();
    let mut data = vec![0u32; n * n * width];

    if n > 1 {
        for (i, row) in data.chunks_mut(n * width).enumerate() {
            let lhs = batch.sketch(i);
            row.par_chunks_mut(width)
                .enumerate()
                .skip(i + 1)
                .for_each(|(j, block)| {
                    let hist = Histogram::union(lhs, batch.sketch(j));
                    block.copy_from_slice(&hist.counts()[..width]);
                });
        }
    }

    UnionHistograms {
        precision,
        sketch_count: n,
        width,
        data,
    }
}

/// CPU engine settings.
///
/// By default work runs on rayon's global pool; `with_threads` builds a
/// dedicated pool of the given size.
#[derive(Debug, Clone, Default)]
pub struct CpuEngine {
    pool: Option<Arc<ThreadPool>>,
}

impl CpuEngine {
    /// Create new engine running on the global rayon pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new engine with a dedicated pool of `threads` workers
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("hll-union-{i}"))
            .build()?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Return number of worker threads used
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Compute dense union histograms of all pairs
    pub fn union_histograms(&self, batch: &SketchBatch<'_>) -> UnionHistograms {
        self.install(|| union_histograms(batch))
    }

    /// Estimate union cardinality of every pair of `batch`.
    ///
    /// Estimates are written straight into the triangular layout; the row of
    /// left sketch `i` is one contiguous slice, split between workers by `j`.
    pub fn union_estimates(&self, batch: &SketchBatch<'_>) -> PairwiseEstimates {
        let started = Instant::now();
        let n = batch.len();
        let precision = batch.precision();
        let mut values = vec![0.0f64; pair_count(n)];

        self.install(|| {
            let mut rest = values.as_mut_slice();
            for i in 0..n.saturating_sub(1) {
                let (row, tail) = std::mem::take(&mut rest).split_at_mut(n - i - 1);
                rest = tail;
                let lhs = batch.sketch(i);
                row.par_iter_mut().enumerate().for_each(|(k, value)| {
                    let rhs = batch.sketch(i + 1 + k);
                    *value = Histogram::union(lhs, rhs).estimate(precision);
                });
            }
        });

        debug!(
            "cpu union estimates: sketches={} p={} pairs={} threads={} elapsed={:?}",
            n,
            precision.get(),
            values.len(),
            self.threads(),
            started.elapsed()
        );
        PairwiseEstimates::new(n, values)
    }

    /// Estimate cardinality of every sketch of `batch`
    pub fn sketch_estimates(&self, batch: &SketchBatch<'_>) -> Vec<f64> {
        let precision = batch.precision();
        self.install(|| {
            (0..batch.len())
                .into_par_iter()
                .map(|i| Histogram::from_registers(batch.sketch(i)).estimate(precision))
                .collect()
        })
    }
}
