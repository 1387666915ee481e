//! ## GPU batch path
//! Union estimates of all sketch pairs are computed by a single kernel
//! dispatch over a grid of `N` work-groups, one per left sketch `i`:
//!
//! 1. lanes of group `i` cooperatively copy sketch `i` into group-local scratch
//!    memory, each lane loading an equal share of the `M` registers;
//! 2. one group-wide barrier makes the full scratch copy visible to all lanes;
//! 3. lane `t` strides over right sketches `j = i + 1 + t, i + 1 + t + B, ...`,
//!    builds a private histogram of `max(scratch[k], sketch_j[k])` and writes its
//!    estimate at `pair_index(i, j, N)`.
//!
//! Groups never synchronize with each other. A second kernel estimates each
//! sketch on its own: lanes histogram disjoint register ranges and add their
//! counts atomically into one histogram shared by the group.
//!
//! The host drives a device through the [`Device`] lifecycle: allocate output,
//! launch, wait for completion, copy back. Output buffers free device memory
//! when dropped, so every exit path, failing or not, releases them.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pairs::{pair_count, PairwiseEstimates};
use crate::sketch::{Precision, SketchBatch};

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod host;

/// Largest number of lanes in a work-group
pub const MAX_BLOCK_DIM: u32 = 1024;

/// Kernels understood by every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    /// Union estimate of every unordered pair, triangular output of `N(N-1)/2` values
    UnionSizes,
    /// Estimate of every sketch, output of `N` values
    SketchSizes,
}

impl Kernel {
    /// Return number of output values produced for `n` sketches
    #[inline]
    pub fn output_len(self, n: usize) -> usize {
        match self {
            Kernel::UnionSizes => pair_count(n),
            Kernel::SketchSizes => n,
        }
    }

    /// Return bytes of group-local memory needed per work-group
    #[inline]
    pub fn shared_memory_bytes(self, precision: Precision) -> usize {
        match self {
            Kernel::UnionSizes => precision.registers(),
            Kernel::SketchSizes => crate::histogram::BINS * std::mem::size_of::<u32>(),
        }
    }

    /// Return kernel entry point name
    pub fn name(self) -> &'static str {
        match self {
            Kernel::UnionSizes => "union_sizes",
            Kernel::SketchSizes => "sketch_sizes",
        }
    }
}

/// Kernel launch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of lanes per work-group
    pub block_dim: u32,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self { block_dim: 256 }
    }
}

impl LaunchConfig {
    /// Create new config with `block_dim` lanes per work-group
    pub fn with_block_dim(block_dim: u32) -> Self {
        Self { block_dim }
    }

    /// Check the config can be launched
    pub fn validate(&self) -> Result<()> {
        if self.block_dim == 0 || self.block_dim > MAX_BLOCK_DIM {
            return Err(Error::Launch(format!(
                "block dimension {} outside of [1..{}]",
                self.block_dim, MAX_BLOCK_DIM
            )));
        }
        Ok(())
    }
}

/// Sketch registers resident in device memory.
pub trait DeviceSketches {
    fn precision(&self) -> Precision;
    /// Return number of sketches
    fn count(&self) -> usize;
}

/// Device executing the batch kernels.
///
/// Methods follow the order of one invocation. Launches may be asynchronous;
/// output is only valid after `synchronize` returned successfully.
pub trait Device {
    type Sketches: DeviceSketches;
    /// Output array; device memory is released when dropped.
    type Output;

    /// Return human readable device name
    fn name(&self) -> String;

    /// Copy registers of `batch` into device memory
    fn upload(&self, batch: &SketchBatch<'_>) -> Result<Self::Sketches>;

    /// Allocate zeroed output array of `len` values
    fn alloc_output(&self, len: usize) -> Result<Self::Output>;

    /// Dispatch `kernel` over `sketches`, writing into `output`
    fn launch(
        &self,
        kernel: Kernel,
        sketches: &Self::Sketches,
        output: &mut Self::Output,
        config: &LaunchConfig,
    ) -> Result<()>;

    /// Wait until all launched work has finished
    fn synchronize(&self) -> Result<()>;

    /// Copy `output` into `host`, which must have the output's length
    fn copy_to_host(&self, output: &Self::Output, host: &mut [f64]) -> Result<()>;
}

/// Kernel results along with the time spent launching and waiting for them.
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub result: T,
    /// Time from launch until the device finished, excluding copies
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    #[inline]
    pub fn into_inner(self) -> T {
        self.result
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Timed<U> {
        Timed {
            result: f(self.result),
            elapsed: self.elapsed,
        }
    }
}

/// Run one kernel end to end and return its host-side results
fn run<D: Device>(
    device: &D,
    kernel: Kernel,
    sketches: &D::Sketches,
    config: &LaunchConfig,
) -> Result<Timed<Vec<f64>>> {
    config.validate()?;
    let n = sketches.count();
    let len = kernel.output_len(n);
    if len == 0 {
        return Ok(Timed {
            result: Vec::new(),
            elapsed: Duration::ZERO,
        });
    }

    let mut output = device.alloc_output(len)?;
    debug!(
        "{}: launching {} with grid={} block={} shared={}B output={}",
        device.name(),
        kernel.name(),
        n,
        config.block_dim,
        kernel.shared_memory_bytes(sketches.precision()),
        len
    );

    let started = Instant::now();
    device
        .launch(kernel, sketches, &mut output, config)
        .and_then(|_| device.synchronize())
        .inspect_err(|e| warn!("{}: {} failed: {}", device.name(), kernel.name(), e))?;
    let elapsed = started.elapsed();

    let mut host = vec![0.0f64; len];
    device.copy_to_host(&output, &mut host)?;
    info!(
        "{}: {} over {} sketches (p={}) took {:?}",
        device.name(),
        kernel.name(),
        n,
        sketches.precision().get(),
        elapsed
    );
    Ok(Timed {
        result: host,
        elapsed,
    })
}

/// Estimate union cardinality of all pairs of device-resident `sketches`
pub fn all_pairs_union<D: Device>(
    device: &D,
    sketches: &D::Sketches,
    config: &LaunchConfig,
) -> Result<Timed<PairwiseEstimates>> {
    let values = run(device, Kernel::UnionSizes, sketches, config)?;
    Ok(values.map(|values| PairwiseEstimates::new(sketches.count(), values)))
}

/// Estimate cardinality of each of device-resident `sketches`
pub fn sketch_sizes<D: Device>(
    device: &D,
    sketches: &D::Sketches,
    config: &LaunchConfig,
) -> Result<Timed<Vec<f64>>> {
    run(device, Kernel::SketchSizes, sketches, config)
}

/// Engine running batches on device `D`, uploading sketches per call.
#[derive(Debug, Clone, Default)]
pub struct GpuEngine<D> {
    device: D,
    config: LaunchConfig,
}

impl<D: Device> GpuEngine<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            config: LaunchConfig::default(),
        }
    }

    pub fn with_config(device: D, config: LaunchConfig) -> Self {
        Self { device, config }
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Upload `batch` and estimate union cardinality of all its pairs
    pub fn union_estimates(&self, batch: &SketchBatch<'_>) -> Result<PairwiseEstimates> {
        let sketches = self.device.upload(batch)?;
        all_pairs_union(&self.device, &sketches, &self.config).map(Timed::into_inner)
    }

    /// Upload `batch` and estimate cardinality of each sketch
    pub fn sketch_estimates(&self, batch: &SketchBatch<'_>) -> Result<Vec<f64>> {
        let sketches = self.device.upload(batch)?;
        sketch_sizes(&self.device, &sketches, &self.config).map(Timed::into_inner)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0 => false)]
    #[test_case(1 => true)]
    #[test_case(256 => true)]
    #[test_case(1024 => true)]
    #[test_case(1025 => false)]
    fn test_launch_config_validation(block_dim: u32) -> bool {
        LaunchConfig::with_block_dim(block_dim).validate().is_ok()
    }

    #[test_case(Kernel::UnionSizes, 5 => 10)]
    #[test_case(Kernel::UnionSizes, 1 => 0)]
    #[test_case(Kernel::SketchSizes, 5 => 5)]
    fn test_output_len(kernel: Kernel, n: usize) -> usize {
        kernel.output_len(n)
    }

    #[test]
    fn test_shared_memory_bytes() {
        let precision = Precision::new(12).unwrap();
        assert_eq!(Kernel::UnionSizes.shared_memory_bytes(precision), 4096);
        assert_eq!(Kernel::SketchSizes.shared_memory_bytes(precision), 256);
    }
}
