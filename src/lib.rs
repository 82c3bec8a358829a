//! Device-resident orchestration runtime for heterogeneous compute kernels.
//!
//! ## Scope
//! A single control thread submits kernel-invocation tasks naming input,
//! output, and in-out buffers. The runtime infers the true dependency graph
//! purely from buffer address-range overlap (callers never author edges),
//! hands out intermediate memory from a caller-scoped bump arena with
//! strictly LIFO lifetimes, and promotes ready tasks to one FIFO queue per
//! worker type so independent work runs concurrently while hazarded work
//! stays ordered.
//!
//! ## Key invariants
//! - All capacity is fixed at orchestration start: task window, edge pool,
//!   overlap-index pools, scope depth, and arena bytes never grow, and
//!   exhausting one is a fatal [`Fault`], not a wait.
//! - Any nonzero range intersection is a full hazard; RAW, WAW, and WAR
//!   edges follow the access roles, and scalar params never participate.
//! - A scope closes only after every task it transitively owns reached a
//!   terminal status; reclamation then rolls the arena back and purges
//!   index history for the freed bytes, in that order.
//! - For a fixed program, submission, hazard, and ready order are fully
//!   deterministic.
//!
//! ## Flow (one run)
//! 1) Build an [`Orchestrator`] from the raw argument vector and sizing.
//! 2) Allocate intermediates ([`Orchestrator::alloc`]) and submit tasks,
//!    bracketed by `open_scope`/`close_scope` pairs.
//! 3) An external dispatch layer pops [`DispatchRecord`]s per worker type,
//!    executes them, and signals a [`CompletionSink`].
//! 4) Completions drain through the control thread; dependents become
//!    ready as their counters reach zero.
//! 5) `finish` barriers on everything outstanding and reports metrics.
//!
//! ## Notable entry points
//! - [`Orchestrator`] / [`OrchestratorConfig`]: the runtime itself.
//! - [`Param`], [`BufferHandle`], [`TensorDesc`], [`WorkerType`]: the
//!   submission vocabulary.
//! - [`KernelRegistry`] / [`InlineDriver`]: host-side execution for tests,
//!   benches, and simulation.

pub mod arena;
pub mod args;
pub mod dispatch;
pub mod error;
pub mod stdx;
pub mod tensor;
#[cfg(test)]
pub mod test_utils;
pub mod tensor_map;
pub mod window;

mod runtime;

pub use arena::{HeapRegion, ReclaimedSpan, ScopedArena, ARENA_ALIGN, MAX_SCOPE_DEPTH};
pub use args::ArgTable;
pub use dispatch::{
    Completion, CompletionSink, DispatchRecord, InlineDriver, KernelCtx, KernelFn,
    KernelOutcome, KernelRegistry,
};
pub use error::{Fault, FaultCode};
pub use runtime::{MetricsSnapshot, Orchestrator, OrchestratorConfig, OrchestratorMetrics};
pub use tensor::{
    BufferHandle, HazardKind, Ownership, Param, ParamRole, TaskId, TaskStatus, TensorDesc,
    WorkerType, MAX_TASK_PARAMS, NUM_WORKER_TYPES,
};
pub use tensor_map::{TensorMap, TensorMapConfig, TensorMapStats};
pub use window::{TaskRecord, TaskWindow};
