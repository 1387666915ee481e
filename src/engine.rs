//! Engines computing batch estimates behind one interface, statically
//! dispatched over the supported execution paths.

use enum_dispatch::enum_dispatch;

use crate::cpu::CpuEngine;
use crate::error::Result;
use crate::gpu::host::HostDevice;
use crate::gpu::{Device, GpuEngine};
use crate::pairs::PairwiseEstimates;
use crate::sketch::SketchBatch;

/// GPU engine running on the host device
pub type HostGpuEngine = GpuEngine<HostDevice>;

/// Execution paths supported by `Engine`
#[derive(Debug, Clone)]
#[enum_dispatch]
pub enum Engine {
    Cpu(CpuEngine),
    Gpu(HostGpuEngine),
}

/// Operations shared by all engines.
#[enum_dispatch(Engine)]
pub trait UnionEstimator {
    /// Estimate union cardinality of every unordered pair of `batch`
    fn estimate_unions(&self, batch: &SketchBatch<'_>) -> Result<PairwiseEstimates>;
    /// Estimate cardinality of every sketch of `batch`
    fn estimate_sketches(&self, batch: &SketchBatch<'_>) -> Result<Vec<f64>>;
    fn name(&self) -> String;
}

impl UnionEstimator for CpuEngine {
    fn estimate_unions(&self, batch: &SketchBatch<'_>) -> Result<PairwiseEstimates> {
        Ok(self.union_estimates(batch))
    }

    fn estimate_sketches(&self, batch: &SketchBatch<'_>) -> Result<Vec<f64>> {
        Ok(self.sketch_estimates(batch))
    }

    fn name(&self) -> String {
        match self.threads() {
            1 => "cpu (1 thread)".to_string(),
            threads => format!("cpu ({threads} threads)"),
        }
    }
}

impl<D: Device> UnionEstimator for GpuEngine<D> {
    fn estimate_unions(&self, batch: &SketchBatch<'_>) -> Result<PairwiseEstimates> {
        self.union_estimates(batch)
    }

    fn estimate_sketches(&self, batch: &SketchBatch<'_>) -> Result<Vec<f64>> {
        self.sketch_estimates(batch)
    }

    fn name(&self) -> String {
        format!("gpu ({})", self.device().name())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::Cpu(CpuEngine::new())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::gpu::LaunchConfig;
    use crate::sketch::Precision;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_engines_agree() {
        let precision = Precision::new(6).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let sketches: Vec<Vec<u8>> = (0..7)
            .map(|_| (0..64).map(|_| rng.gen_range(0..=10)).collect())
            .collect();
        let batch = SketchBatch::new(precision, sketches.iter().map(Vec::as_slice)).unwrap();

        let engines: Vec<Engine> = vec![
            Engine::default(),
            CpuEngine::with_threads(2).unwrap().into(),
            GpuEngine::with_config(HostDevice::new(), LaunchConfig::with_block_dim(4)).into(),
        ];
        let results: Vec<PairwiseEstimates> = engines
            .iter()
            .map(|engine| engine.estimate_unions(&batch).unwrap())
            .collect();
        for estimates in &results[1..] {
            for ((_, a), (_, b)) in results[0].iter().zip(estimates.iter()) {
                assert!((a - b).abs() <= 1e-9 * a.abs());
            }
        }

        let sizes: Vec<Vec<f64>> = engines
            .iter()
            .map(|engine| engine.estimate_sketches(&batch).unwrap())
            .collect();
        assert_eq!(sizes[0], sizes[2]);
    }

    #[test]
    fn test_engine_names() {
        let gpu: Engine = GpuEngine::new(HostDevice::new()).into();
        assert_eq!(gpu.name(), "gpu (host)");
        let cpu: Engine = CpuEngine::with_threads(1).unwrap().into();
        assert_eq!(cpu.name(), "cpu (1 thread)");
        let cpu: Engine = CpuEngine::with_threads(3).unwrap().into();
        assert_eq!(cpu.name(), "cpu (3 threads)");
    }
}
