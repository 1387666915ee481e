#![no_main]

use hll_union::{
    union_histograms, CpuEngine, GpuEngine, HostDevice, LaunchConfig, Precision, SketchBatch,
};
use libfuzzer_sys::fuzz_target;
use wyhash::wyhash;

/// Sketches of 16 registers, one per 16 bytes of input
const P: u8 = 4;

fuzz_target!(|data: &[u8]| {
    let precision = Precision::new(P).unwrap();
    let max = precision.max_rank();
    let registers: Vec<u8> = data.iter().map(|&r| r % (max + 1)).collect();
    let sketches: Vec<&[u8]> = registers.chunks_exact(precision.registers()).collect();
    let batch = SketchBatch::new(precision, sketches).unwrap();

    let block_dim = 1 + (wyhash(data, 0) % 64) as u32;
    let gpu = GpuEngine::with_config(HostDevice::new(), LaunchConfig::with_block_dim(block_dim));
    let cpu = CpuEngine::new().union_estimates(&batch);
    let host = gpu.union_estimates(&batch).unwrap();
    assert_eq!(cpu.len(), host.len());
    for ((pair, c), (_, g)) in cpu.iter().zip(host.iter()) {
        assert!(c > 0.0, "{pair:?}: {c}");
        assert!((c - g).abs() <= 1e-9 * c, "{pair:?}: {c} vs {g}");
    }

    let dense = union_histograms(&batch);
    for ((i, j), _) in cpu.iter() {
        let histogram = dense.histogram(i, j).unwrap();
        assert_eq!(histogram.total(), precision.registers() as u64);
    }
    assert_eq!(gpu.device().allocated_bytes(), 0);
});
