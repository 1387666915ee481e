use thiserror::Error;

/// Errors reported while validating a sketch batch or running it on a device.
///
/// Every device-side variant is fatal for the whole batch: no partial results
/// are returned once one of them is raised.
#[derive(Debug, Error)]
pub enum Error {
    #[error("precision {0} is outside of the supported [4..18] range")]
    InvalidPrecision(u8),
    #[error("sketch {index} has {len} registers, expected {expected}")]
    SketchLength {
        index: usize,
        len: usize,
        expected: usize,
    },
    #[error("sketch {index} register {register} holds {value}, maximum is {max}")]
    RegisterOutOfRange {
        index: usize,
        register: usize,
        value: u8,
        max: u8,
    },
    #[error("{len} values do not pack the pairs of {sketch_count} sketches")]
    PairCount { sketch_count: usize, len: usize },
    #[error("{len} bins of width {width} do not lay out {sketch_count} sketches at precision {precision}")]
    HistogramLayout {
        sketch_count: usize,
        width: usize,
        len: usize,
        precision: u8,
    },
    #[error("device allocation of {bytes} bytes failed: {reason}")]
    Alloc { bytes: usize, reason: String },
    #[error("kernel launch failed: {0}")]
    Launch(String),
    #[error("device synchronization failed: {0}")]
    Synchronize(String),
    #[error("device to host copy failed: {0}")]
    Copy(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
