//! ## CUDA device
//! Runs the batch kernels on an NVIDIA GPU. Kernels are CUDA C compiled to PTX
//! with NVRTC when the device is opened, and launched on the context's default
//! stream. `cudarc` frees device slices on drop.

use std::sync::Arc;

use cudarc::driver::{
    CudaContext, CudaFunction, CudaSlice, CudaStream, LaunchConfig as CudaLaunchConfig,
    PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;
use log::{debug, info};

use crate::error::{Error, Result};
use crate::gpu::host::DEFAULT_SHARED_MEMORY;
use crate::gpu::{Device, DeviceSketches, Kernel, LaunchConfig};
use crate::sketch::{Precision, SketchBatch};

/// CUDA C source of the batch kernels.
///
/// `union_estimate` mirrors `estimator::estimate` and `pair_index` mirrors
/// `pairs::pair_index`.
const KERNEL_SRC: &str = r#"
__device__ double union_estimate(const unsigned int *hist, unsigned int p) {
    double m = (double)(1u << p);
    double alpha = p == 4 ? 0.573 : p == 5 ? 0.697 : p == 6 ? 0.709 : 0.7213 / (1.0 + 1.079 / m);
    double s = hist[0];
    for (unsigned int i = 1; i <= 64 - p; ++i)
        s += ldexp((double)hist[i], -(int)i);
    return alpha * m * m / s;
}

__device__ unsigned long long pair_index(unsigned long long i, unsigned long long j, unsigned long long n) {
    return i * (2 * n - i - 1) / 2 + j - (i + 1);
}

extern "C" __global__
void union_sizes(
    const unsigned char* __restrict__ registers,
    unsigned int p,
    unsigned int n,
    double* __restrict__ sizes
){
    extern __shared__ unsigned char scratch[];
    unsigned int i = blockIdx.x;
    if (i + 1 >= n) return;

    unsigned int m = 1u << p;
    unsigned int per_lane = (m + blockDim.x - 1) / blockDim.x;
    unsigned int start = min(threadIdx.x * per_lane, m);
    unsigned int end = min(start + per_lane, m);
    const unsigned char* left = registers + ((size_t)i << p);
    for (unsigned int k = start; k < end; ++k)
        scratch[k] = left[k];
    __syncthreads();

    for (unsigned int j = i + 1 + threadIdx.x; j < n; j += blockDim.x) {
        unsigned int hist[64] = {0};
        const unsigned char* right = registers + ((size_t)j << p);
        for (unsigned int k = 0; k < m; ++k)
            ++hist[max((unsigned int)scratch[k], (unsigned int)right[k])];
        sizes[pair_index(i, j, n)] = union_estimate(hist, p);
    }
}

extern "C" __global__
void sketch_sizes(
    const unsigned char* __restrict__ registers,
    unsigned int p,
    unsigned int n,
    double* __restrict__ sizes
){
    __shared__ unsigned int bins[64];
    unsigned int i = blockIdx.x;
    if (i >= n) return;

    for (unsigned int b = threadIdx.x; b < 64; b += blockDim.x)
        bins[b] = 0;
    __syncthreads();

    unsigned int m = 1u << p;
    unsigned int per_lane = (m + blockDim.x - 1) / blockDim.x;
    unsigned int start = min(threadIdx.x * per_lane, m);
    unsigned int end = min(start + per_lane, m);
    const unsigned char* sketch = registers + ((size_t)i << p);
    unsigned int counts[64] = {0};
    for (unsigned int k = start; k < end; ++k)
        ++counts[sketch[k]];
    for (unsigned int b = 0; b < 64; ++b)
        if (counts[b]) atomicAdd(&bins[b], counts[b]);
    __syncthreads();

    if (threadIdx.x == 0)
        sizes[i] = union_estimate(bins, p);
}
"#;

/// Return number of visible CUDA devices
pub fn device_count() -> Result<usize> {
    let count = CudaContext::device_count().map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    Ok(count.max(0) as usize)
}

/// Sketch registers resident in GPU memory.
pub struct CudaSketches {
    registers: CudaSlice<u8>,
    precision: Precision,
    count: usize,
}

impl DeviceSketches for CudaSketches {
    #[inline]
    fn precision(&self) -> Precision {
        self.precision
    }

    #[inline]
    fn count(&self) -> usize {
        self.count
    }
}

/// An opened CUDA device with the batch kernels loaded.
#[derive(Clone)]
pub struct CudaDevice {
    ordinal: usize,
    stream: Arc<CudaStream>,
    union_sizes: CudaFunction,
    sketch_sizes: CudaFunction,
}

impl CudaDevice {
    /// Open device `ordinal` and compile the batch kernels for it
    pub fn new(ordinal: usize) -> Result<Self> {
        let ctx = CudaContext::new(ordinal).map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        let ptx = compile_ptx(KERNEL_SRC)
            .map_err(|e| Error::DeviceUnavailable(format!("nvrtc compile: {e:?}")))?;
        let module = ctx
            .load_module(ptx)
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        let load = |kernel: Kernel| {
            module
                .load_function(kernel.name())
                .map_err(|e| Error::DeviceUnavailable(format!("load {}: {e}", kernel.name())))
        };
        let union_sizes = load(Kernel::UnionSizes)?;
        let sketch_sizes = load(Kernel::SketchSizes)?;
        info!("cuda device {} ready", ordinal);

        Ok(Self {
            ordinal,
            stream: ctx.default_stream(),
            union_sizes,
            sketch_sizes,
        })
    }

    #[inline]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl Device for CudaDevice {
    type Sketches = CudaSketches;
    type Output = CudaSlice<f64>;

    fn name(&self) -> String {
        format!("cuda:{}", self.ordinal)
    }

    fn upload(&self, batch: &SketchBatch<'_>) -> Result<CudaSketches> {
        let flat = batch.flatten();
        let registers = self.stream.clone_htod(flat.as_slice()).map_err(|e| Error::Alloc {
            bytes: flat.len(),
            reason: e.to_string(),
        })?;
        debug!("{}: uploaded {} sketches ({} bytes)", self.name(), batch.len(), flat.len());
        Ok(CudaSketches {
            registers,
            precision: batch.precision(),
            count: batch.len(),
        })
    }

    fn alloc_output(&self, len: usize) -> Result<CudaSlice<f64>> {
        self.stream.alloc_zeros::<f64>(len).map_err(|e| Error::Alloc {
            bytes: len * std::mem::size_of::<f64>(),
            reason: e.to_string(),
        })
    }

    fn launch(
        &self,
        kernel: Kernel,
        sketches: &CudaSketches,
        output: &mut CudaSlice<f64>,
        config: &LaunchConfig,
    ) -> Result<()> {
        config.validate()?;
        let n = sketches.count;
        let precision = sketches.precision;
        if output.len() != kernel.output_len(n) {
            return Err(Error::Launch(format!(
                "{} over {} sketches writes {} values, output holds {}",
                kernel.name(),
                n,
                kernel.output_len(n),
                output.len()
            )));
        }
        let shared = kernel.shared_memory_bytes(precision);
        if shared > DEFAULT_SHARED_MEMORY {
            return Err(Error::Launch(format!(
                "{} needs {} bytes of shared memory, {} available",
                kernel.name(),
                shared,
                DEFAULT_SHARED_MEMORY
            )));
        }
        if n == 0 {
            return Ok(());
        }

        let n_u32 = u32::try_from(n)
            .map_err(|_| Error::Launch(format!("{n} sketches exceed the grid size")))?;
        let (function, block_dim, dynamic_shared) = match kernel {
            Kernel::UnionSizes => (&self.union_sizes, config.block_dim.min(n_u32), shared as u32),
            Kernel::SketchSizes => (
                &self.sketch_sizes,
                config.block_dim.min(precision.registers() as u32),
                0,
            ),
        };
        let cfg = CudaLaunchConfig {
            grid_dim: (n_u32, 1, 1),
            block_dim: (block_dim, 1, 1),
            shared_mem_bytes: dynamic_shared,
        };
        let p = u32::from(precision.get());

        let mut launch = self.stream.launch_builder(function);
        launch.arg(&sketches.registers);
        launch.arg(&p);
        launch.arg(&n_u32);
        launch.arg(output);
        // SAFETY: argument order and types match the kernel signatures in `KERNEL_SRC`,
        // and `output` was checked to hold `kernel.output_len(n)` values.
        unsafe { launch.launch(cfg) }.map_err(|e| Error::Launch(e.to_string()))?;
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| Error::Synchronize(e.to_string()))
    }

    fn copy_to_host(&self, output: &CudaSlice<f64>, host: &mut [f64]) -> Result<()> {
        if host.len() != output.len() {
            return Err(Error::Copy(format!(
                "host buffer holds {} values, device output {}",
                host.len(),
                output.len()
            )));
        }
        self.stream
            .memcpy_dtoh(output, host)
            .map_err(|e| Error::Copy(e.to_string()))
    }
}
