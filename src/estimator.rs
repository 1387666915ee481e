//! ## Union estimator
//! Converts a register-value histogram into a HyperLogLog cardinality estimate:
//!
//! `E = alpha(M) * M^2 / (h[0] + sum(h[i] * 2^-i, i = 1..=64 - P))`
//!
//! The sum stops at `64 - P` because no register can encode more leading zeros
//! than that. The estimate is raw: no small or large range correction is applied.
//!
//! [Original HyperLogLog paper](http://algo.inria.fr/flajolet/Publications/FlFuGaMe07.pdf)

use crate::histogram::BINS;
use crate::sketch::Precision;

/// Parameter for bias correction.
///
/// `M = 16` uses `0.573`, not the published `0.673`.
#[inline]
pub fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.573,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (m as f64)),
    }
}

/// Return cardinality estimate for histogram `counts` of sketch(es) with given `precision`.
///
/// An all-zero histogram produces a non-finite estimate, which is returned as is.
#[inline]
pub fn estimate(counts: &[u32; BINS], precision: Precision) -> f64 {
    let m = precision.registers();
    let max_rank = usize::from(precision.max_rank());
    let sum = counts[1..=max_rank]
        .iter()
        .enumerate()
        .fold(f64::from(counts[0]), |sum, (i, &c)| {
            sum + f64::from(c) * 0.5f64.powi(i as i32 + 1)
        });
    alpha(m) * (m * m) as f64 / sum
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(16 => 0.573; "literal constant for 16 registers")]
    #[test_case(32 => 0.697)]
    #[test_case(64 => 0.709)]
    fn test_alpha_literals(m: usize) -> f64 {
        alpha(m)
    }

    #[test]
    fn test_alpha_formula() {
        let expected = 0.7213 / (1.0 + 1.079 / 4096.0);
        assert_eq!(alpha(4096), expected);
    }

    #[test]
    fn test_single_register_of_rank_three() {
        let precision = Precision::new(4).unwrap();
        let mut counts = [0u32; BINS];
        counts[0] = 15;
        counts[3] = 1;
        let e = estimate(&counts, precision);
        // 0.573 * 16^2 / (15 + 1/8)
        assert!((e - 0.573 * 256.0 / 15.125).abs() < 1e-12);
        assert!((e - 9.698_380_165_289_256).abs() < 1e-9);
    }

    #[test]
    fn test_empty_sketch_estimate() {
        let precision = Precision::new(12).unwrap();
        let mut counts = [0u32; BINS];
        counts[0] = 4096;
        let e = estimate(&counts, precision);
        let expected = alpha(4096) * 4096.0;
        assert!((e - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_histogram_is_not_finite() {
        let precision = Precision::new(8).unwrap();
        let counts = [0u32; BINS];
        assert!(!estimate(&counts, precision).is_finite());
    }

    #[test]
    fn test_top_rank_is_counted() {
        let precision = Precision::new(4).unwrap();
        let mut counts = [0u32; BINS];
        counts[60] = 16;
        let e = estimate(&counts, precision);
        assert!(e.is_finite());
        assert!(e > 0.0);
        // Ranks past 64 - P never contribute.
        counts[61] = 5;
        assert_eq!(estimate(&counts, precision), e);
    }

    #[test_case(4)]
    #[test_case(5)]
    #[test_case(6)]
    #[test_case(10)]
    #[test_case(14)]
    #[test_case(18)]
    fn test_estimate_positive_and_finite(p: u8) {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let precision = Precision::new(p).unwrap();
        let mut rng = StdRng::seed_from_u64(u64::from(p));
        for _ in 0..32 {
            let mut counts = [0u32; BINS];
            for _ in 0..precision.registers() {
                counts[rng.gen_range(0..=usize::from(precision.max_rank()))] += 1;
            }
            if counts[1..].iter().all(|&c| c == 0) {
                counts[0] -= 1;
                counts[1] += 1;
            }
            let e = estimate(&counts, precision);
            assert!(e.is_finite() && e > 0.0, "p = {p}, estimate = {e}");
        }
    }
}
