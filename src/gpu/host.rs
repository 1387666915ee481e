//! ## Host device
//! Executes the batch kernels on the host with the same execution model a GPU
//! provides: every lane of a work-group is its own thread, group-local memory
//! is a per-group buffer visible to the group's lanes only, `Lane::sync` is a
//! group-wide barrier, and concurrent updates of shared bins use atomics.
//! Work-groups run concurrently on the rayon pool without any ordering.
//!
//! Device memory is plain host memory with allocation accounting, so limits
//! on global and group-local memory behave like they do on a real device.

use std::mem::size_of;
use std::sync::atomic::Ordering::{AcqRel, Relaxed};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize};
use std::sync::{Arc, Barrier, Condvar, Mutex, PoisonError};
use std::thread;

use log::debug;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::gpu::{Device, DeviceSketches, Kernel, LaunchConfig};
use crate::histogram::{Histogram, BINS};
use crate::pairs::pair_index;
use crate::sketch::{Precision, SketchBatch};

/// Default group-local memory available per work-group
pub const DEFAULT_SHARED_MEMORY: usize = 48 * 1024;

/// Device executing kernels on host threads.
#[derive(Debug, Clone)]
pub struct HostDevice {
    memory_limit: usize,
    shared_memory_limit: usize,
    lane_stack_size: Option<usize>,
    allocated: Arc<AtomicUsize>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self {
            memory_limit: usize::MAX,
            shared_memory_limit: DEFAULT_SHARED_MEMORY,
            lane_stack_size: None,
            allocated: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit total bytes of device memory allocated at once
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Limit bytes of group-local memory per work-group
    pub fn with_shared_memory_limit(mut self, bytes: usize) -> Self {
        self.shared_memory_limit = bytes;
        self
    }

    /// Set stack size of lane threads, the platform default otherwise
    pub fn with_lane_stack_size(mut self, bytes: usize) -> Self {
        self.lane_stack_size = Some(bytes);
        self
    }

    fn lane_builder(&self) -> thread::Builder {
        match self.lane_stack_size {
            Some(bytes) => thread::Builder::new().stack_size(bytes),
            None => thread::Builder::new(),
        }
    }

    /// Return bytes of device memory currently allocated
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Relaxed)
    }

    fn reserve(&self, bytes: usize) -> Result<Reservation> {
        let mut current = self.allocated.load(Relaxed);
        loop {
            let next = current
                .checked_add(bytes)
                .filter(|&next| next <= self.memory_limit)
                .ok_or_else(|| Error::Alloc {
                    bytes,
                    reason: format!("{} of {} bytes in use", current, self.memory_limit),
                })?;
            match self
                .allocated
                .compare_exchange_weak(current, next, AcqRel, Relaxed)
            {
                Ok(_) => {
                    return Ok(Reservation {
                        bytes,
                        allocated: Arc::clone(&self.allocated),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Accounted device memory, returned to the device when dropped.
#[derive(Debug)]
struct Reservation {
    bytes: usize,
    allocated: Arc<AtomicUsize>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.allocated.fetch_sub(self.bytes, AcqRel);
        debug!("host device: released {} bytes", self.bytes);
    }
}

/// Allocate `len` elements, reporting allocator failure instead of aborting
fn try_alloc<T>(len: usize, init: impl FnMut() -> T) -> Result<Vec<T>> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(len).map_err(|e| Error::Alloc {
        bytes: len.saturating_mul(size_of::<T>()),
        reason: e.to_string(),
    })?;
    vec.resize_with(len, init);
    Ok(vec)
}

/// Sketch registers uploaded to a [`HostDevice`], sketch `i` at offset `i * M`.
#[derive(Debug)]
pub struct HostSketches {
    registers: Vec<u8>,
    precision: Precision,
    count: usize,
    _reservation: Reservation,
}

impl HostSketches {
    #[inline]
    fn sketch(&self, idx: usize) -> &[u8] {
        let m = self.precision.registers();
        &self.registers[idx * m..(idx + 1) * m]
    }
}

impl DeviceSketches for HostSketches {
    #[inline]
    fn precision(&self) -> Precision {
        self.precision
    }

    #[inline]
    fn count(&self) -> usize {
        self.count
    }
}

/// Output array of a [`HostDevice`] holding `f64` bits.
#[derive(Debug)]
pub struct HostBuffer {
    cells: Vec<AtomicU64>,
    _reservation: Reservation,
}

impl HostBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// One lane of a work-group.
struct Lane<'g> {
    /// Work-group index within the grid
    group: usize,
    /// Lane index within the work-group
    id: usize,
    /// Number of lanes in the work-group
    size: usize,
    barrier: &'g Barrier,
}

impl Lane<'_> {
    /// Block until every lane of the work-group reached this point
    #[inline]
    fn sync(&self) {
        self.barrier.wait();
    }

    /// Return this lane's share of `len` items split evenly across the group
    #[inline]
    fn share(&self, len: usize) -> std::ops::Range<usize> {
        let per_lane = len.div_ceil(self.size);
        let start = (self.id * per_lane).min(len);
        start..(start + per_lane).min(len)
    }
}

/// State of a work-group's start gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Closed,
    Open,
    Aborted,
}

/// Holds lanes of a work-group back until every lane has been spawned.
struct StartGate {
    state: Mutex<Gate>,
    released: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(Gate::Closed),
            released: Condvar::new(),
        }
    }

    fn release(&self, gate: Gate) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = gate;
        self.released.notify_all();
    }

    /// Block until the gate is released, return whether the lane may run
    fn wait(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self
            .released
            .wait_while(state, |gate| *gate == Gate::Closed)
            .unwrap_or_else(PoisonError::into_inner);
        *state == Gate::Open
    }
}

/// Run `kernel` on a grid of `groups` work-groups of `lanes` lanes each.
///
/// Every work-group gets a fresh group-local buffer from `scratch`, and lane
/// `id` runs on a thread from `builder(id)`. Lanes start only once the whole
/// group is spawned; if a spawn fails, the spawned lanes exit without running
/// `kernel` and the launch fails. A kernel must reach `Lane::sync` on all
/// lanes of a group or on none of them.
fn dispatch<S, B, F, K>(groups: usize, lanes: usize, builder: B, scratch: F, kernel: K) -> Result<()>
where
    S: Sync,
    B: Fn(usize) -> thread::Builder + Sync,
    F: Fn() -> S + Sync,
    K: Fn(&Lane<'_>, &S) + Sync,
{
    (0..groups).into_par_iter().try_for_each(|group| {
        let shared = scratch();
        let barrier = Barrier::new(lanes);
        let gate = StartGate::new();
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(lanes);
            for id in 0..lanes {
                let lane = Lane {
                    group,
                    id,
                    size: lanes,
                    barrier: &barrier,
                };
                let (shared, kernel, gate) = (&shared, &kernel, &gate);
                let spawned = builder(id).spawn_scoped(scope, move || {
                    if gate.wait() {
                        kernel(&lane, shared);
                    }
                });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        gate.release(Gate::Aborted);
                        return Err(Error::Launch(format!(
                            "spawning lane {id} of work-group {group}: {e}"
                        )));
                    }
                }
            }
            gate.release(Gate::Open);
            handles.into_iter().try_for_each(|handle| {
                handle
                    .join()
                    .map_err(|_| Error::Launch(format!("lane of work-group {group} aborted")))
            })
        })
    })
}

/// Group `i` caches sketch `i` in `scratch`, then every lane estimates unions
/// of sketch `i` with its share of sketches `j > i`.
fn union_sizes(lane: &Lane<'_>, scratch: &[AtomicU8], sketches: &HostSketches, sizes: &[AtomicU64]) {
    let n = sketches.count;
    let i = lane.group;
    // Uniform across the group, so no lane is left waiting at the barrier.
    if i + 1 >= n {
        return;
    }

    let left = sketches.sketch(i);
    for k in lane.share(left.len()) {
        scratch[k].store(left[k], Relaxed);
    }
    lane.sync();

    for j in (i + 1 + lane.id..n).step_by(lane.size) {
        let right = sketches.sketch(j);
        let mut hist = Histogram::default();
        for (cached, &r) in scratch.iter().zip(right) {
            hist.increment(cached.load(Relaxed).max(r));
        }
        let estimate = hist.estimate(sketches.precision);
        sizes[pair_index(i, j, n)].store(estimate.to_bits(), Relaxed);
    }
}

/// Group `i` histograms sketch `i`: lanes count their share of registers
/// privately, add the counts into the group's shared bins, and lane 0
/// estimates the combined histogram.
fn sketch_sizes(
    lane: &Lane<'_>,
    bins: &[AtomicU32; BINS],
    sketches: &HostSketches,
    sizes: &[AtomicU64],
) {
    let registers = sketches.sketch(lane.group);
    let private = Histogram::from_registers(&registers[lane.share(registers.len())]);
    for (bin, &count) in bins.iter().zip(private.counts()) {
        if count != 0 {
            bin.fetch_add(count, Relaxed);
        }
    }
    lane.sync();

    if lane.id == 0 {
        let counts = std::array::from_fn(|b| bins[b].load(Relaxed));
        let estimate = Histogram::from_counts(counts).estimate(sketches.precision);
        sizes[lane.group].store(estimate.to_bits(), Relaxed);
    }
}

impl Device for HostDevice {
    type Sketches = HostSketches;
    type Output = HostBuffer;

    fn name(&self) -> String {
        "host".to_string()
    }

    fn upload(&self, batch: &SketchBatch<'_>) -> Result<HostSketches> {
        let precision = batch.precision();
        let len = batch.len() * precision.registers();
        let reservation = self.reserve(len)?;
        let mut registers = Vec::new();
        registers.try_reserve_exact(len).map_err(|e| Error::Alloc {
            bytes: len,
            reason: e.to_string(),
        })?;
        for sketch in batch.iter() {
            registers.extend_from_slice(sketch);
        }
        debug!("host device: uploaded {} sketches ({} bytes)", batch.len(), len);

        Ok(HostSketches {
            registers,
            precision,
            count: batch.len(),
            _reservation: reservation,
        })
    }

    fn alloc_output(&self, len: usize) -> Result<HostBuffer> {
        let bytes = len.saturating_mul(size_of::<f64>());
        let reservation = self.reserve(bytes)?;
        let cells = try_alloc(len, || AtomicU64::new(0f64.to_bits()))?;
        debug!("host device: allocated output of {} values", len);
        Ok(HostBuffer {
            cells,
            _reservation: reservation,
        })
    }

    fn launch(
        &self,
        kernel: Kernel,
        sketches: &HostSketches,
        output: &mut HostBuffer,
        config: &LaunchConfig,
    ) -> Result<()> {
        config.validate()?;
        let n = sketches.count;
        let precision = sketches.precision;

        let shared = kernel.shared_memory_bytes(precision);
        if shared > self.shared_memory_limit {
            return Err(Error::Launch(format!(
                "{} needs {} bytes of group-local memory, {} available",
                kernel.name(),
                shared,
                self.shared_memory_limit
            )));
        }
        if output.len() != kernel.output_len(n) {
            return Err(Error::Launch(format!(
                "{} over {} sketches writes {} values, output holds {}",
                kernel.name(),
                n,
                kernel.output_len(n),
                output.len()
            )));
        }
        if n == 0 {
            return Ok(());
        }

        let block_dim = config.block_dim as usize;
        let sizes = output.cells.as_slice();
        match kernel {
            Kernel::UnionSizes => dispatch(
                n,
                block_dim.min(n),
                |_| self.lane_builder(),
                || {
                    (0..precision.registers())
                        .map(|_| AtomicU8::new(0))
                        .collect::<Vec<_>>()
                },
                |lane, scratch| union_sizes(lane, scratch, sketches, sizes),
            ),
            Kernel::SketchSizes => dispatch(
                n,
                block_dim.min(precision.registers()),
                |_| self.lane_builder(),
                || std::array::from_fn::<_, BINS, _>(|_| AtomicU32::new(0)),
                |lane, bins| sketch_sizes(lane, bins, sketches, sizes),
            ),
        }
    }

    fn synchronize(&self) -> Result<()> {
        // Launches complete before returning.
        Ok(())
    }

    fn copy_to_host(&self, output: &HostBuffer, host: &mut [f64]) -> Result<()> {
        if host.len() != output.len() {
            return Err(Error::Copy(format!(
                "host buffer holds {} values, device output {}",
                host.len(),
                output.len()
            )));
        }
        for (dst, cell) in host.iter_mut().zip(&output.cells) {
            *dst = f64::from_bits(cell.load(Relaxed));
        }
        Ok(())
    }
}
