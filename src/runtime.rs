//! Orchestrator: the single control path tying arena, overlap index, task
//! window, and ready queues together.
//!
//! # Scheduling model
//! One control thread performs all submission, hazard resolution, and scope
//! bookkeeping; none of the owned structures are synchronized. Workers run
//! dispatched tasks concurrently and report results through the one
//! completion channel, which the control thread drains. The inferred
//! dependency graph is the sole synchronization between hazarded tasks.
//!
//! # Blocking
//! The only blocking point is the scope-close barrier, which waits on the
//! completion channel until every task the closing scope owns is terminal,
//! then reclaims arena bytes and purges index history for them — in that
//! order, always.
//!
//! # Fatal conditions
//! Capacity limits are fixed by [`OrchestratorConfig`]; violating one
//! surfaces a [`Fault`] immediately. There is no growth and no waiting for
//! space.

use crossbeam_channel::{Receiver, Sender};

use crate::arena::{HeapRegion, ScopedArena, MAX_SCOPE_DEPTH};
use crate::args::ArgTable;
use crate::dispatch::{Completion, CompletionSink, DispatchRecord, KernelOutcome};
use crate::error::Fault;
use crate::stdx::ReadyRing;
use crate::tensor::{
    BufferHandle, HazardKind, Param, TaskId, TaskStatus, WorkerType, MAX_TASK_PARAMS,
    NUM_WORKER_TYPES,
};
use crate::tensor_map::{TensorMap, TensorMapConfig, TensorMapStats};
use crate::window::TaskWindow;

/// Sizing and wiring for one orchestration run.
///
/// Every capacity here is final: the orchestrator allocates everything at
/// init and never grows. Capacity choices are the host's responsibility and
/// exceeding one at runtime is a fatal fault.
pub struct OrchestratorConfig {
    /// Producer-declared argument count, trailing heap slots included.
    pub expected_arg_count: u32,
    /// Live (unretired) task records.
    pub task_window_capacity: u32,
    /// Successor-edge records across all live tasks.
    pub dep_pool_capacity: u32,
    /// Overlap-index pool sizing.
    pub tensor_map: TensorMapConfig,
    /// Memory region backing the scoped arena.
    pub heap: HeapRegion,
}

/// Monotonic counters describing one orchestration run.
///
/// All counters only increase for the lifetime of the orchestrator.
/// `edges_*` count distinct inferred dependency edges by hazard kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrchestratorMetrics {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_aborted: u64,
    pub edges_raw: u64,
    pub edges_war: u64,
    pub edges_waw: u64,
    /// Tasks with no unresolved dependency at submission.
    pub ready_at_submit: u64,
    pub ready_pushes: u64,
    pub completions_drained: u64,
    pub scopes_opened: u64,
    pub scopes_closed: u64,
    pub index_entries_purged: u64,
}

/// Point-in-time view for host-side overhead and sizing analysis.
#[derive(Clone, Copy, Debug)]
pub struct MetricsSnapshot {
    pub counters: OrchestratorMetrics,
    pub arena_used: u64,
    pub arena_high_water: u64,
    pub tensor_map: TensorMapStats,
    pub window_live: u32,
    pub edges_in_use: u32,
    /// First kernel failure reported this run, if any.
    pub first_failure: Option<(TaskId, i32)>,
}

/// Device-resident orchestration runtime for one run.
///
/// Borrows the raw argument vector for its lifetime; owns every bounded
/// structure. See the module docs for the threading contract.
pub struct Orchestrator<'a> {
    args: ArgTable<'a>,
    arena: ScopedArena,
    map: TensorMap,
    window: TaskWindow,
    ready: [ReadyRing; NUM_WORKER_TYPES],
    /// Incomplete tasks owned by each scope depth. LIFO closure keeps the
    /// invariant that all depths below the current one read zero.
    scope_live: [u32; MAX_SCOPE_DEPTH],
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
    scratch_sources: Vec<(TaskId, HazardKind)>,
    scratch_successors: Vec<TaskId>,
    first_failure: Option<(TaskId, i32)>,
    metrics: OrchestratorMetrics,
}

impl<'a> Orchestrator<'a> {
    /// Validate the argument vector and build every bounded structure.
    ///
    /// An argument-count mismatch is rejected here, before anything is
    /// allocated.
    pub fn new(args: &'a [u64], config: OrchestratorConfig) -> Result<Self, Fault> {
        let args = ArgTable::new(args, config.expected_arg_count)?;

        let window_capacity = config.task_window_capacity;
        // A completion can be outstanding for every live task at once, so a
        // channel bound of the window capacity never blocks a well-behaved
        // dispatch layer.
        let (completion_tx, completion_rx) =
            crossbeam_channel::bounded(window_capacity as usize);

        Ok(Self {
            args,
            arena: ScopedArena::new(config.heap),
            map: TensorMap::new(config.tensor_map),
            window: TaskWindow::new(window_capacity, config.dep_pool_capacity),
            ready: [
                ReadyRing::with_capacity(window_capacity),
                ReadyRing::with_capacity(window_capacity),
            ],
            scope_live: [0; MAX_SCOPE_DEPTH],
            completion_tx,
            completion_rx,
            scratch_sources: Vec::with_capacity(window_capacity as usize),
            // Abort cascades can drain every edge in one pass.
            scratch_successors: Vec::with_capacity(config.dep_pool_capacity as usize),
            first_failure: None,
            metrics: OrchestratorMetrics::default(),
        })
    }

    #[inline]
    pub fn args(&self) -> &ArgTable<'a> {
        &self.args
    }

    #[inline]
    pub fn scope_depth(&self) -> u8 {
        self.arena.depth()
    }

    #[inline]
    pub fn live_tasks(&self) -> u32 {
        self.window.live()
    }

    /// Allocate an intermediate buffer from the scoped arena.
    pub fn alloc(&mut self, len: u32) -> Result<BufferHandle, Fault> {
        self.arena.alloc(len)
    }

    /// Open a nested scope. Allocations and submissions made until the
    /// matching close are owned by it.
    pub fn open_scope(&mut self) -> Result<(), Fault> {
        let depth = self.arena.open_scope()?;
        debug_assert_eq!(self.scope_live[depth as usize], 0);
        self.metrics.scopes_opened += 1;
        Ok(())
    }

    /// Close the innermost scope: barrier on every task it owns, then roll
    /// the arena back and purge index history for the reclaimed bytes.
    pub fn close_scope(&mut self) -> Result<(), Fault> {
        let depth = self.arena.depth();
        if depth == 0 {
            return Err(Fault::ScopeUnderflow);
        }

        self.barrier(depth)?;

        let span = self.arena.close_scope()?;
        let purged = self.map.purge_span(span.addr, span.len);
        self.metrics.index_entries_purged += u64::from(purged);
        self.metrics.scopes_closed += 1;
        Ok(())
    }

    /// Submit one kernel invocation.
    ///
    /// Malformed submissions (too many params, null buffers, version
    /// assertion failures) are rejected before any graph mutation. Hazards
    /// are resolved in caller parameter order; the unresolved count is the
    /// number of distinct live hazard-source tasks.
    pub fn submit_task(
        &mut self,
        kernel_id: u32,
        worker: WorkerType,
        kernel_name: &'static str,
        params: &[Param],
    ) -> Result<TaskId, Fault> {
        if params.len() > MAX_TASK_PARAMS {
            return Err(Fault::TooManyParams {
                count: params.len(),
            });
        }
        for (index, param) in params.iter().enumerate() {
            let Some((_, desc)) = param.desc() else {
                continue;
            };
            if desc.addr == 0 {
                return Err(Fault::NullBuffer {
                    param_index: index as u8,
                });
            }
            if desc.expect_version != 0 {
                let actual = self.map.version_of(&desc);
                if actual != desc.expect_version {
                    return Err(Fault::VersionMismatch {
                        expected: desc.expect_version,
                        actual,
                        param_index: index as u8,
                    });
                }
            }
        }

        let scope = self.arena.depth();
        let id = self
            .window
            .insert(kernel_id, kernel_name, worker, params, scope)?;
        self.scope_live[scope as usize] += 1;
        self.metrics.tasks_submitted += 1;

        // Hazard resolution, deduplicated to distinct live sources. Sources
        // that already reached a terminal status impose no ordering.
        let Self {
            window,
            map,
            scratch_sources,
            ..
        } = self;
        scratch_sources.clear();
        for param in params {
            let Some((role, desc)) = param.desc() else {
                continue;
            };
            // A zero-length range cannot alias anything.
            if desc.len == 0 {
                continue;
            }
            map.record_access(id, role, desc, |source, kind| {
                let Some(record) = window.get(source) else {
                    return;
                };
                if record.status.is_terminal() {
                    return;
                }
                if scratch_sources.iter().any(|&(s, _)| s == source) {
                    return;
                }
                scratch_sources.push((source, kind));
            })?;
        }

        let unresolved = self.scratch_sources.len() as u32;
        for i in 0..self.scratch_sources.len() {
            let (source, kind) = self.scratch_sources[i];
            match kind {
                HazardKind::Raw => self.metrics.edges_raw += 1,
                HazardKind::War => self.metrics.edges_war += 1,
                HazardKind::Waw => self.metrics.edges_waw += 1,
            }
            self.window.add_edge(source, id)?;
        }

        let record = self.window.get_mut(id).expect("freshly inserted task");
        record.unresolved = unresolved;
        if unresolved == 0 {
            record.status = TaskStatus::Ready;
            self.metrics.ready_at_submit += 1;
            self.push_ready(id, worker);
        }
        Ok(id)
    }

    /// Hand the oldest ready task of `worker` to the external dispatch
    /// layer, marking it dispatched.
    pub fn pop_ready(&mut self, worker: WorkerType) -> Option<DispatchRecord> {
        let id = self.ready[worker.queue_index()].pop()?;
        let record = self.window.get_mut(id).expect("ready task is live");
        assert_eq!(record.status, TaskStatus::Ready);
        record.status = TaskStatus::Dispatched;
        Some(DispatchRecord::from_record(record))
    }

    /// Cloneable sender the dispatch layer signals completions through.
    pub fn completion_sink(&self) -> CompletionSink {
        CompletionSink::new(self.completion_tx.clone())
    }

    /// Drain every completion currently queued, without blocking. Returns
    /// the number processed.
    pub fn drain_completions(&mut self) -> Result<u32, Fault> {
        let mut drained = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.process_completion(completion)?;
            drained += 1;
        }
        Ok(drained)
    }

    /// Finish the run: barrier on every outstanding task, reclaim the whole
    /// arena, and report final metrics. Rejected while scopes are open.
    pub fn finish(mut self) -> Result<MetricsSnapshot, Fault> {
        let depth = self.arena.depth();
        if depth != 0 {
            return Err(Fault::UnclosedScope { depth });
        }

        self.barrier(0)?;
        let span = self.arena.reclaim_all();
        let purged = self.map.purge_span(span.addr, span.len);
        self.metrics.index_entries_purged += u64::from(purged);
        Ok(self.metrics_snapshot())
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.metrics,
            arena_used: self.arena.used(),
            arena_high_water: self.arena.high_water(),
            tensor_map: self.map.stats(),
            window_live: self.window.live(),
            edges_in_use: self.window.edges_in_use(),
            first_failure: self.first_failure,
        }
    }

    /// Block until every task owned by `depth` is terminal. Descendant
    /// scopes have already closed (LIFO), so their counters read zero.
    fn barrier(&mut self, depth: u8) -> Result<(), Fault> {
        debug_assert!(self.scope_live[depth as usize + 1..]
            .iter()
            .all(|&live| live == 0));

        while self.scope_live[depth as usize] > 0 {
            let completion = self
                .completion_rx
                .recv()
                .expect("orchestrator holds a completion sender");
            self.process_completion(completion)?;
        }
        Ok(())
    }

    fn push_ready(&mut self, id: TaskId, worker: WorkerType) {
        self.metrics.ready_pushes += 1;
        self.ready[worker.queue_index()]
            .push(id)
            .expect("ready ring sized to the task window");
    }

    fn process_completion(&mut self, completion: Completion) -> Result<(), Fault> {
        let record = self
            .window
            .get_mut(completion.task)
            .ok_or(Fault::UnknownTask {
                task: completion.task,
            })?;
        assert_eq!(
            record.status,
            TaskStatus::Dispatched,
            "completion for a task that was never dispatched"
        );
        self.metrics.completions_drained += 1;

        match completion.outcome {
            KernelOutcome::Success => {
                record.status = TaskStatus::Completed;
                let scope = record.scope;
                self.scope_live[scope as usize] -= 1;
                self.metrics.tasks_completed += 1;

                self.scratch_successors.clear();
                self.window
                    .drain_successors(completion.task, &mut self.scratch_successors);
                self.window.retire(completion.task);

                for i in 0..self.scratch_successors.len() {
                    let successor = self.scratch_successors[i];
                    let record = self
                        .window
                        .get_mut(successor)
                        .expect("successor outlives its predecessor");
                    if record.status.is_terminal() {
                        // Aborted by an earlier failure; nothing to resolve.
                        continue;
                    }
                    assert!(record.unresolved > 0);
                    record.unresolved -= 1;
                    if record.unresolved == 0 {
                        record.status = TaskStatus::Ready;
                        let worker = record.worker;
                        self.push_ready(successor, worker);
                    }
                }
            }
            KernelOutcome::Failed { code } => {
                record.status = TaskStatus::Failed;
                let scope = record.scope;
                self.scope_live[scope as usize] -= 1;
                self.metrics.tasks_failed += 1;
                if self.first_failure.is_none() {
                    self.first_failure = Some((completion.task, code));
                }
                self.abort_dependents(completion.task);
            }
        }
        Ok(())
    }

    /// Transitively mark every dependent of `failed` as aborted. Aborted
    /// tasks never become ready; their scope counters drain here so scope
    /// barriers cannot deadlock after a failure.
    fn abort_dependents(&mut self, failed: TaskId) {
        self.scratch_successors.clear();
        self.window
            .drain_successors(failed, &mut self.scratch_successors);
        self.window.retire(failed);

        let mut cursor = 0;
        while cursor < self.scratch_successors.len() {
            let task = self.scratch_successors[cursor];
            cursor += 1;

            let record = self
                .window
                .get_mut(task)
                .expect("dependent outlives its predecessor");
            if record.status.is_terminal() {
                continue;
            }
            debug_assert_eq!(record.status, TaskStatus::Pending);
            record.status = TaskStatus::Aborted;
            let scope = record.scope;
            self.scope_live[scope as usize] -= 1;
            self.metrics.tasks_aborted += 1;

            self.window
                .drain_successors(task, &mut self.scratch_successors);
            self.window.retire(task);
        }
    }
}
