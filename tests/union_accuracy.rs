use hll_union::gpu::host::HostDevice;
use hll_union::{
    pair_count, CpuEngine, Engine, GpuEngine, LaunchConfig, Precision, SketchBatch,
    UnionEstimator,
};
use test_case::test_case;
use wyhash::wyhash;

/// Build registers of a sketch holding `items`: the top `P` hash bits select
/// the register, the rank is one more than the leading zeros of the rest.
fn build_sketch(precision: Precision, items: impl Iterator<Item = u64>) -> Vec<u8> {
    let p = u32::from(precision.get());
    let mut registers = vec![0u8; precision.registers()];
    for item in items {
        let hash = wyhash(&item.to_le_bytes(), 0);
        let idx = (hash >> (64 - p)) as usize;
        let rank = ((hash << p).leading_zeros() + 1).min(64 - p) as u8;
        registers[idx] = registers[idx].max(rank);
    }
    registers
}

/// Sketch `k` holds items `[k * step, k * step + len)`.
fn overlapping_sketches(precision: Precision, n: u64, step: u64, len: u64) -> Vec<Vec<u8>> {
    (0..n)
        .map(|k| build_sketch(precision, k * step..k * step + len))
        .collect()
}

fn union_size(step: u64, len: u64, i: usize, j: usize) -> f64 {
    let distance = step * (j.abs_diff(i) as u64);
    (len + distance.min(len)) as f64
}

#[test_case(10, 6, 5_000, 20_000; "p10 heavy overlap")]
#[test_case(12, 5, 30_000, 40_000; "p12 partial overlap")]
#[test_case(14, 4, 200_000, 120_000; "p14 disjoint")]
fn test_union_estimates_are_accurate(p: u8, n: u64, step: u64, len: u64) {
    let precision = Precision::new(p).unwrap();
    let sketches = overlapping_sketches(precision, n, step, len);
    let batch = SketchBatch::new(precision, sketches.iter().map(Vec::as_slice)).unwrap();

    // Four standard errors of the HyperLogLog estimate.
    let tolerance = 4.0 * 1.04 / (precision.registers() as f64).sqrt();
    let unions = CpuEngine::new().union_estimates(&batch);
    assert_eq!(unions.len(), pair_count(n as usize));
    for ((i, j), estimate) in unions.iter() {
        let actual = union_size(step, len, i, j);
        let error = (estimate - actual).abs() / actual;
        assert!(error < tolerance, "({i}, {j}): estimate {estimate:.0}, actual {actual}");
    }
}

#[test]
fn test_cpu_and_gpu_paths_agree() {
    let precision = Precision::new(11).unwrap();
    let sketches = overlapping_sketches(precision, 24, 700, 3_000);
    let batch = SketchBatch::new(precision, sketches.iter().map(Vec::as_slice)).unwrap();

    let cpu: Engine = CpuEngine::new().into();
    let gpu: Engine =
        GpuEngine::with_config(HostDevice::new(), LaunchConfig::with_block_dim(8)).into();

    let cpu_unions = cpu.estimate_unions(&batch).unwrap();
    let gpu_unions = gpu.estimate_unions(&batch).unwrap();
    assert_eq!(cpu_unions.len(), 276);
    for ((pair, c), (_, g)) in cpu_unions.iter().zip(gpu_unions.iter()) {
        assert!((c - g).abs() / c < 1e-9, "{pair:?}: {c} vs {g}");
    }

    let cpu_sizes = cpu.estimate_sketches(&batch).unwrap();
    let gpu_sizes = gpu.estimate_sketches(&batch).unwrap();
    for (c, g) in cpu_sizes.iter().zip(&gpu_sizes) {
        assert!((c - g).abs() / c < 1e-9);
    }
}

#[test]
fn test_jaccard_from_union_estimates() {
    let precision = Precision::new(12).unwrap();
    // Sketch 1 shares half of sketch 0, sketch 2 shares nothing.
    let sketches = [
        build_sketch(precision, 0..40_000),
        build_sketch(precision, 20_000..60_000),
        build_sketch(precision, 1_000_000..1_040_000),
    ];
    let batch = SketchBatch::new(precision, sketches.iter().map(Vec::as_slice)).unwrap();
    let engine = CpuEngine::new();
    let sizes = engine.sketch_estimates(&batch);
    let jaccard = engine.union_estimates(&batch).jaccard(&sizes);

    let similar = jaccard.get(0, 1).unwrap();
    assert!((similar - 1.0 / 3.0).abs() < 0.1, "{similar}");
    assert!(jaccard.get(0, 2).unwrap() < 0.1);
    assert!(jaccard.get(2, 1).unwrap() < 0.1);
}

#[test]
fn test_identical_sketches_union_to_own_size() {
    let precision = Precision::new(10).unwrap();
    let sketch = build_sketch(precision, 0..10_000);
    let batch = SketchBatch::new(precision, [sketch.as_slice(), sketch.as_slice()]).unwrap();
    let engine = CpuEngine::new();
    let size = engine.sketch_estimates(&batch)[0];
    assert_eq!(engine.union_estimates(&batch).get(1, 0), Some(size));
}
