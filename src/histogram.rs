//! ## Register-value histogram
//! `counts[k]` holds the number of registers equal to `k`. For a union of two
//! sketches the registers are merged by taking the register-wise maximum,
//! without materializing the merged sketch.

use std::fmt::{Debug, Formatter};
use std::ops::Index;

use crate::estimator;
use crate::sketch::Precision;

/// Number of histogram bins, enough for any rank a 64-bit hash can produce.
pub const BINS: usize = 64;

/// Register-value histogram of a sketch or of a union of two sketches.
#[derive(Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: [u32; BINS],
}

impl Histogram {
    /// Create histogram from raw bin counts
    #[inline]
    pub fn from_counts(counts: [u32; BINS]) -> Self {
        Self { counts }
    }

    /// Create histogram of a single sketch's registers.
    ///
    /// # Panics
    /// Panics if a register value is `>= 64`.
    #[inline]
    pub fn from_registers(registers: &[u8]) -> Self {
        let mut hist = Self::default();
        for &r in registers {
            hist.increment(r);
        }
        hist
    }

    /// Create histogram of the register-wise maximum of `lhs` and `rhs`.
    ///
    /// Registers are scanned in groups of 8 to let the compiler keep the
    /// loop body branch free.
    ///
    /// # Panics
    /// Panics if a register value is `>= 64`.
    #[inline]
    pub fn union(lhs: &[u8], rhs: &[u8]) -> Self {
        debug_assert_eq!(lhs.len(), rhs.len());
        let mut counts = [0u32; BINS];
        let lhs_chunks = lhs.chunks_exact(8);
        let rhs_chunks = rhs.chunks_exact(8);
        let tail = lhs_chunks.remainder().iter().zip(rhs_chunks.remainder());

        for (l, r) in lhs_chunks.zip(rhs_chunks) {
            counts[usize::from(l[0].max(r[0]))] += 1;
            counts[usize::from(l[1].max(r[1]))] += 1;
            counts[usize::from(l[2].max(r[2]))] += 1;
            counts[usize::from(l[3].max(r[3]))] += 1;
            counts[usize::from(l[4].max(r[4]))] += 1;
            counts[usize::from(l[5].max(r[5]))] += 1;
            counts[usize::from(l[6].max(r[6]))] += 1;
            counts[usize::from(l[7].max(r[7]))] += 1;
        }
        for (&l, &r) in tail {
            counts[usize::from(l.max(r))] += 1;
        }

        Self { counts }
    }

    /// Count one more register holding `value`
    #[inline]
    pub fn increment(&mut self, value: u8) {
        self.counts[usize::from(value)] += 1;
    }

    /// Return number of registers counted
    #[inline]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    #[inline]
    pub fn counts(&self) -> &[u32; BINS] {
        &self.counts
    }

    /// Return cardinality estimate of the histogram
    #[inline]
    pub fn estimate(&self, precision: Precision) -> f64 {
        estimator::estimate(&self.counts, precision)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            counts: [0; BINS],
        }
    }
}

impl Index<usize> for Histogram {
    type Output = u32;

    #[inline]
    fn index(&self, bin: usize) -> &u32 {
        &self.counts[bin]
    }
}

impl Debug for Histogram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Trailing empty bins are omitted.
        let used = self.counts.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1);
        f.debug_list().entries(&self.counts[..used]).finish()
    }
}
