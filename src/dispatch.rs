//! Dispatch-layer collaborator surface.
//!
//! The orchestrator core never executes kernels. An external dispatch layer
//! pops [`DispatchRecord`]s from the per-worker ready queues, runs them on
//! whatever execution units it manages, and reports results through a
//! [`CompletionSink`]. Everything in this module is that boundary, plus an
//! inline single-threaded driver with a host kernel registry so tests and
//! benches can run whole orchestrations with real numerics.

use ahash::AHashMap;
use crossbeam_channel::Sender;

use crate::error::Fault;
use crate::runtime::Orchestrator;
use crate::tensor::{Param, TaskId, WorkerType, MAX_TASK_PARAMS};
use crate::window::TaskRecord;

/// Result of one kernel execution, reported by the dispatch layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelOutcome {
    Success,
    /// Device status code from the failing kernel.
    Failed { code: i32 },
}

/// One completion signal flowing back to the control thread.
#[derive(Clone, Copy, Debug)]
pub struct Completion {
    pub task: TaskId,
    pub outcome: KernelOutcome,
}

/// Cloneable handle workers use to report completions.
///
/// The channel is bounded to the task-window capacity; a well-behaved
/// dispatch layer (at most one signal per dispatched task) never blocks.
#[derive(Clone)]
pub struct CompletionSink {
    tx: Sender<Completion>,
}

impl CompletionSink {
    pub(crate) fn new(tx: Sender<Completion>) -> Self {
        Self { tx }
    }

    pub fn signal(&self, task: TaskId, outcome: KernelOutcome) {
        // A send can only fail once the orchestrator is torn down, at which
        // point nobody is left to care about the result.
        let _ = self.tx.send(Completion { task, outcome });
    }
}

/// Everything the external dispatch layer needs to run one task.
#[derive(Clone, Copy, Debug)]
pub struct DispatchRecord {
    pub task: TaskId,
    pub kernel_id: u32,
    pub kernel_name: &'static str,
    pub worker: WorkerType,
    params: [Param; MAX_TASK_PARAMS],
    param_count: u8,
}

impl DispatchRecord {
    pub(crate) fn from_record(record: &TaskRecord) -> Self {
        let mut params = [Param::Scalar(0); MAX_TASK_PARAMS];
        let src = record.params();
        params[..src.len()].copy_from_slice(src);
        Self {
            task: record.id,
            kernel_id: record.kernel_id,
            kernel_name: record.kernel_name,
            worker: record.worker,
            params,
            param_count: src.len() as u8,
        }
    }

    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params[..self.param_count as usize]
    }
}

/// Host kernel signature for the inline driver: positional params in, a
/// device status code out on failure.
pub type KernelFn = fn(&KernelCtx<'_>) -> Result<(), i32>;

/// Parameter view handed to host kernels by the inline driver.
pub struct KernelCtx<'a> {
    params: &'a [Param],
}

impl<'a> KernelCtx<'a> {
    #[inline]
    pub fn params(&self) -> &[Param] {
        self.params
    }

    /// Raw scalar payload of param `index`.
    ///
    /// # Panics
    /// Panics if the param is buffer-bearing.
    pub fn scalar(&self, index: usize) -> u64 {
        match self.params[index] {
            Param::Scalar(value) => value,
            other => panic!("param {index} is not a scalar: {other:?}"),
        }
    }

    /// Scalar payload decoded as the `f32` bit pattern kernels use.
    pub fn scalar_f32(&self, index: usize) -> f32 {
        f32::from_bits(self.scalar(index) as u32)
    }

    /// View a buffer param as a shared `f32` slice.
    ///
    /// Soundness relies on the [`InlineDriver::new`] contract: every buffer
    /// address reaching this driver is backed by host memory.
    pub fn f32s(&self, index: usize) -> &[f32] {
        let (addr, len) = self.buffer(index);
        unsafe { std::slice::from_raw_parts(addr as *const f32, len as usize / 4) }
    }

    /// View a buffer param as a mutable `f32` slice.
    ///
    /// The dependency graph guarantees no hazarded task runs concurrently,
    /// and the inline driver runs one kernel at a time, so the exclusive
    /// borrow cannot alias another live one.
    #[allow(clippy::mut_from_ref)]
    pub fn f32s_mut(&self, index: usize) -> &mut [f32] {
        let (addr, len) = self.buffer(index);
        unsafe { std::slice::from_raw_parts_mut(addr as *mut f32, len as usize / 4) }
    }

    fn buffer(&self, index: usize) -> (u64, u32) {
        match self.params[index].desc() {
            Some((_, desc)) => (desc.addr, desc.len),
            None => panic!("param {index} is not buffer-bearing"),
        }
    }
}

/// Symbolic-name lookup table for host kernels.
#[derive(Default)]
pub struct KernelRegistry {
    kernels: AHashMap<&'static str, KernelFn>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, kernel: KernelFn) -> &mut Self {
        let previous = self.kernels.insert(name, kernel);
        assert!(previous.is_none(), "kernel {name:?} registered twice");
        self
    }

    pub fn get(&self, name: &str) -> Option<KernelFn> {
        self.kernels.get(name).copied()
    }
}

/// Single-threaded dispatch driver: pops ready tasks, runs the registered
/// host kernel inline, and feeds the completion straight back.
///
/// Dispatch order is the ready-queue order, matrix queue first each step,
/// so runs are fully deterministic for a fixed program.
pub struct InlineDriver {
    registry: KernelRegistry,
}

impl InlineDriver {
    /// # Safety
    /// Every buffer address submitted to the orchestrations this driver
    /// runs must be backed by readable/writable host memory of the declared
    /// length (arena regions from [`crate::arena::HeapRegion::host_alloc`],
    /// external buffers from host slices). Kernels dereference them.
    pub unsafe fn new(registry: KernelRegistry) -> Self {
        Self { registry }
    }

    /// Run at most one ready task. Returns `false` when both ready queues
    /// are empty.
    pub fn step(&self, orch: &mut Orchestrator<'_>) -> Result<bool, Fault> {
        let record = orch
            .pop_ready(WorkerType::Cube)
            .or_else(|| orch.pop_ready(WorkerType::Vector));
        let Some(record) = record else {
            return Ok(false);
        };

        let kernel = self
            .registry
            .get(record.kernel_name)
            .unwrap_or_else(|| panic!("no kernel registered for {:?}", record.kernel_name));

        let ctx = KernelCtx {
            params: record.params(),
        };
        let outcome = match kernel(&ctx) {
            Ok(()) => KernelOutcome::Success,
            Err(code) => KernelOutcome::Failed { code },
        };

        orch.completion_sink().signal(record.task, outcome);
        orch.drain_completions()?;
        Ok(true)
    }

    /// Drain both ready queues to empty, returning the number of tasks run.
    pub fn run_until_idle(&self, orch: &mut Orchestrator<'_>) -> Result<u32, Fault> {
        let mut executed = 0;
        while self.step(orch)? {
            executed += 1;
        }
        Ok(executed)
    }
}
