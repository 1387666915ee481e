#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use hll_union::{union_histograms, CpuEngine, GpuEngine, HostDevice, Precision, SketchBatch};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tabled::{
    settings::{Settings, Style},
    Table, Tabled,
};

#[derive(Tabled)]
struct Record {
    sketches: usize,
    dense_histograms: String,
    triangular_cpu: String,
    triangular_gpu: String,
}

/// Return heap bytes and blocks allocated by `run`
fn measure_memory_usage<T>(run: impl Fn() -> T) -> (u64, u64) {
    let _profiler = dhat::Profiler::builder().testing().build();
    let result = run();
    let stats = dhat::HeapStats::get();
    drop(result);
    (stats.total_bytes, stats.total_blocks)
}

fn format_usage((bytes, blocks): (u64, u64)) -> String {
    format!("{} / {}", bytes, blocks)
}

#[test]
fn test_allocations() {
    let precision = Precision::new(10).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let sketches: Vec<Vec<u8>> = (0..64)
        .map(|_| {
            (0..precision.registers())
                .map(|_| rng.gen_range(0..=16))
                .collect()
        })
        .collect();

    let cpu = CpuEngine::new();
    let gpu = GpuEngine::new(HostDevice::new());

    let results: Vec<Record> = (1..=6)
        .map(|c| 1usize << c)
        .map(|n| {
            let batch =
                SketchBatch::new(precision, sketches[..n].iter().map(Vec::as_slice)).unwrap();
            // Warm up thread pools outside of the measurement.
            cpu.union_estimates(&batch);

            let dense = measure_memory_usage(|| union_histograms(&batch));
            let triangular = measure_memory_usage(|| cpu.union_estimates(&batch));
            if n >= 16 {
                assert!(
                    dense.0 > triangular.0,
                    "n = {n}: dense {dense:?}, triangular {triangular:?}"
                );
            }

            Record {
                sketches: n,
                dense_histograms: format_usage(dense),
                triangular_cpu: format_usage(triangular),
                triangular_gpu: format_usage(measure_memory_usage(|| {
                    gpu.union_estimates(&batch)
                })),
            }
        })
        .collect();

    let table_config = Settings::default().with(Style::markdown());
    let markdown = Table::new(results).with(table_config).to_string();
    println!("{}", markdown);
}
