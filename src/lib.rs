//! `hll-union` estimates the cardinality of the union of every pair of HyperLogLog
//! sketches in a batch, without merging or copying the sketches themselves.
//!
//! Two execution paths are provided: a multi-core CPU engine parallelizing over
//! pairs, and a GPU path running one kernel dispatch over the whole batch, with
//! a host device executing the same kernels when no GPU is present.
//!
//! ```
//! use hll_union::{CpuEngine, Precision, SketchBatch};
//!
//! let precision = Precision::new(4).unwrap();
//! let mut a = [0u8; 16];
//! let mut b = [0u8; 16];
//! a[3] = 3;
//! b[3] = 1;
//! let batch = SketchBatch::new(precision, [&a[..], &b[..]]).unwrap();
//! let unions = CpuEngine::new().union_estimates(&batch);
//! assert_eq!(unions.len(), 1);
//! assert!(unions.get(0, 1).unwrap() > 0.0);
//! ```
pub mod cpu;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod gpu;
pub mod histogram;
pub mod pairs;
#[cfg(feature = "with_serde")]
mod serde;
pub mod sketch;

pub use cpu::{union_histograms, CpuEngine, UnionHistograms};
pub use engine::{Engine, UnionEstimator};
pub use error::{Error, Result};
pub use gpu::host::HostDevice;
pub use gpu::{all_pairs_union, sketch_sizes, Device, GpuEngine, LaunchConfig, Timed};
pub use histogram::Histogram;
pub use pairs::{pair_count, pair_index, PairwiseEstimates};
pub use sketch::{Precision, SketchBatch};
