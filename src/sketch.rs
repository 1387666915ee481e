//! ## Sketch batches
//! A batch is a set of `N` read-only HyperLogLog register arrays which share
//! one precision `P`. Every sketch holds `M = 2^P` registers, each register
//! storing a rank in `[0..64 - P]`.
//!
//! Sketches are owned elsewhere; a batch only borrows them after checking
//! that their shape is consistent, so the union engines can index registers
//! and histogram bins without further checks.

use std::slice;

use crate::error::{Error, Result};

/// Smallest supported precision
pub const MIN_PRECISION: u8 = 4;
/// Largest supported precision
pub const MAX_PRECISION: u8 = 18;

/// HyperLogLog precision `P`, the number of bits used for register indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "with_serde", serde(try_from = "u8", into = "u8"))]
pub struct Precision(u8);

impl Precision {
    /// Create new precision, checking it is in `[4..18]` range
    #[inline]
    pub fn new(p: u8) -> Result<Self> {
        if (MIN_PRECISION..=MAX_PRECISION).contains(&p) {
            Ok(Self(p))
        } else {
            Err(Error::InvalidPrecision(p))
        }
    }

    /// Return raw precision value
    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }

    /// Number of registers `M = 2^P`
    #[inline]
    pub fn registers(self) -> usize {
        1 << self.0
    }

    /// Largest rank a register can hold: no more than `64 - P` leading zeros
    /// are observable in the hash bits left after the register index.
    #[inline]
    pub fn max_rank(self) -> u8 {
        64 - self.0
    }

    /// Number of histogram bins stored per pair by the dense CPU layout
    #[inline]
    pub fn histogram_width(self) -> usize {
        usize::from(self.max_rank()) + 2
    }
}

impl TryFrom<u8> for Precision {
    type Error = Error;

    fn try_from(p: u8) -> Result<Self> {
        Self::new(p)
    }
}

impl From<Precision> for u8 {
    fn from(precision: Precision) -> Self {
        precision.0
    }
}

/// Validated, borrowed batch of sketches sharing one precision.
#[derive(Debug, Clone)]
pub struct SketchBatch<'a> {
    precision: Precision,
    sketches: Vec<&'a [u8]>,
}

impl<'a> SketchBatch<'a> {
    /// Create new batch from register slices.
    ///
    /// Fails when a sketch does not have exactly `2^P` registers or when a
    /// register exceeds `64 - P`.
    pub fn new<I>(precision: Precision, sketches: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let expected = precision.registers();
        let max = precision.max_rank();
        let sketches: Vec<&'a [u8]> = sketches.into_iter().collect();

        for (index, registers) in sketches.iter().enumerate() {
            if registers.len() != expected {
                return Err(Error::SketchLength {
                    index,
                    len: registers.len(),
                    expected,
                });
            }
            if let Some((register, &value)) =
                registers.iter().enumerate().find(|(_, &v)| v > max)
            {
                return Err(Error::RegisterOutOfRange {
                    index,
                    register,
                    value,
                    max,
                });
            }
        }

        Ok(Self {
            precision,
            sketches,
        })
    }

    /// Return shared precision of the batch
    #[inline]
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Return number of sketches in the batch
    #[inline]
    pub fn len(&self) -> usize {
        self.sketches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sketches.is_empty()
    }

    /// Return registers of `idx`-th sketch
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&'a [u8]> {
        self.sketches.get(idx).copied()
    }

    /// Return registers of `idx`-th sketch, `idx` must be in range
    #[inline]
    pub(crate) fn sketch(&self, idx: usize) -> &'a [u8] {
        self.sketches[idx]
    }

    #[inline]
    pub fn iter(&self) -> std::iter::Copied<slice::Iter<'_, &'a [u8]>> {
        self.sketches.iter().copied()
    }

    /// Return registers of all sketches as one contiguous array,
    /// sketch `i` starting at offset `i * M`.
    pub fn flatten(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.len() * self.precision.registers());
        for registers in &self.sketches {
            flat.extend_from_slice(registers);
        }
        flat
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0 => false)]
    #[test_case(3 => false)]
    #[test_case(4 => true)]
    #[test_case(12 => true)]
    #[test_case(18 => true)]
    #[test_case(19 => false)]
    fn test_precision_range(p: u8) -> bool {
        Precision::new(p).is_ok()
    }

    #[test_case(4 => (16, 60, 62))]
    #[test_case(10 => (1024, 54, 56))]
    #[test_case(18 => (262144, 46, 48))]
    fn test_precision_shape(p: u8) -> (usize, u8, usize) {
        let precision = Precision::new(p).unwrap();
        (
            precision.registers(),
            precision.max_rank(),
            precision.histogram_width(),
        )
    }

    #[test]
    fn test_batch_rejects_wrong_length() {
        let precision = Precision::new(4).unwrap();
        let good = [0u8; 16];
        let short = [0u8; 15];
        let err = SketchBatch::new(precision, [&good[..], &short[..]]).unwrap_err();
        assert!(matches!(
            err,
            Error::SketchLength {
                index: 1,
                len: 15,
                expected: 16
            }
        ));
    }

    #[test]
    fn test_batch_rejects_register_overflow() {
        let precision = Precision::new(4).unwrap();
        let mut bad = [0u8; 16];
        bad[7] = 61;
        let err = SketchBatch::new(precision, [&bad[..]]).unwrap_err();
        assert!(matches!(
            err,
            Error::RegisterOutOfRange {
                index: 0,
                register: 7,
                value: 61,
                max: 60
            }
        ));
    }

    #[test]
    fn test_flatten_layout() {
        let precision = Precision::new(4).unwrap();
        let a = [1u8; 16];
        let b = [2u8; 16];
        let batch = SketchBatch::new(precision, [&a[..], &b[..]]).unwrap();
        let flat = batch.flatten();
        assert_eq!(flat.len(), 32);
        assert!(flat[..16].iter().all(|&r| r == 1));
        assert!(flat[16..].iter().all(|&r| r == 2));
        assert_eq!(batch.get(1), Some(&b[..]));
        assert_eq!(batch.get(2), None);
    }
}
