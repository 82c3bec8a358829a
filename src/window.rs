//! Task window and dependency-edge pool.
//!
//! # Scope
//! The window is a fixed-capacity ring of task records addressed by
//! `id % capacity`. Task ids are monotonic; each slot stamps the id it
//! currently holds so stale references (from overlap-index history or old
//! completion signals) are detected instead of aliasing a recycled slot.
//! A slot is recycled only after its task reached a terminal status and its
//! successor list was drained; submitting past an unretired slot is a fatal
//! window-exhaustion fault, never a wait.
//!
//! Successor lists live in a pool of `u32`-linked edge records, appended at
//! the tail so dependents are notified in submission order.

use crate::error::Fault;
use crate::stdx::{SlotPool, NIL};
use crate::tensor::{Param, TaskId, TaskStatus, WorkerType, MAX_TASK_PARAMS};

/// One kernel invocation tracked by the window.
pub struct TaskRecord {
    pub id: TaskId,
    pub kernel_id: u32,
    /// Symbolic name the external dispatch layer resolves to a kernel.
    pub kernel_name: &'static str,
    pub worker: WorkerType,
    params: [Param; MAX_TASK_PARAMS],
    param_count: u8,
    pub status: TaskStatus,
    /// Distinct hazard sources this task still waits on.
    pub unresolved: u32,
    /// Scope depth that owns this task.
    pub scope: u8,
    succ_head: u32,
    succ_tail: u32,
    retired: bool,
}

impl TaskRecord {
    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params[..self.param_count as usize]
    }

    #[inline]
    pub fn has_successors(&self) -> bool {
        self.succ_head != NIL
    }
}

struct Edge {
    successor: TaskId,
    next: u32,
}

/// Fixed-capacity ring of task records plus successor-edge storage.
pub struct TaskWindow {
    slots: Box<[Option<TaskRecord>]>,
    edges: SlotPool<Edge>,
    next_id: u32,
    live: u32,
}

impl TaskWindow {
    pub fn new(window_capacity: u32, edge_capacity: u32) -> Self {
        assert!(window_capacity > 0, "task window capacity must be > 0");

        let mut slots = Vec::with_capacity(window_capacity as usize);
        slots.resize_with(window_capacity as usize, || None);

        Self {
            slots: slots.into_boxed_slice(),
            edges: SlotPool::with_capacity(edge_capacity),
            next_id: 0,
            live: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Tasks occupying a slot (submitted, not yet retired).
    #[inline]
    pub fn live(&self) -> u32 {
        self.live
    }

    #[inline]
    fn slot_of(&self, id: TaskId) -> usize {
        (id.0 % self.capacity()) as usize
    }

    /// Allocate the next task record. Fails when the ring has wrapped onto
    /// a slot whose previous occupant has not retired.
    pub fn insert(
        &mut self,
        kernel_id: u32,
        kernel_name: &'static str,
        worker: WorkerType,
        params: &[Param],
        scope: u8,
    ) -> Result<TaskId, Fault> {
        assert!(params.len() <= MAX_TASK_PARAMS);

        let id = TaskId(self.next_id);
        let slot = self.slot_of(id);
        if let Some(prev) = &self.slots[slot] {
            if !prev.retired {
                return Err(Fault::WindowExhausted {
                    capacity: self.capacity(),
                });
            }
        }

        let mut record = TaskRecord {
            id,
            kernel_id,
            kernel_name,
            worker,
            params: [Param::Scalar(0); MAX_TASK_PARAMS],
            param_count: params.len() as u8,
            status: TaskStatus::Pending,
            unresolved: 0,
            scope,
            succ_head: NIL,
            succ_tail: NIL,
            retired: false,
        };
        record.params[..params.len()].copy_from_slice(params);

        self.slots[slot] = Some(record);
        // Ids never wrap: slot stamping relies on id uniqueness.
        self.next_id = self.next_id.checked_add(1).expect("task id overflow");
        self.live += 1;
        Ok(id)
    }

    /// Look up a task record; `None` for ids whose slot was recycled or
    /// never assigned.
    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        let record = self.slots[self.slot_of(id)].as_ref()?;
        (record.id == id).then_some(record)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        let slot = self.slot_of(id);
        let record = self.slots[slot].as_mut()?;
        (record.id == id).then_some(record)
    }

    /// Record `successor` on `source`'s list, in append order.
    pub fn add_edge(&mut self, source: TaskId, successor: TaskId) -> Result<(), Fault> {
        debug_assert!(source < successor, "edges point forward in submission order");

        let link = self
            .edges
            .acquire(Edge {
                successor,
                next: NIL,
            })
            .ok_or(Fault::EdgePoolExhausted {
                capacity: self.edges.capacity(),
            })?;

        let record = self.get_mut(source).expect("edge source is live");
        if record.succ_tail == NIL {
            record.succ_head = link;
        } else {
            let tail = record.succ_tail;
            self.edges.get_mut(tail).next = link;
        }
        // Reborrow: the tail update above touched the edge pool.
        self.get_mut(source).expect("edge source is live").succ_tail = link;
        Ok(())
    }

    /// Drain `task`'s successor list into `out` in append (submission)
    /// order, releasing the edge records.
    pub fn drain_successors(&mut self, task: TaskId, out: &mut Vec<TaskId>) {
        let record = self.get_mut(task).expect("draining a live task");
        let mut link = record.succ_head;
        record.succ_head = NIL;
        record.succ_tail = NIL;

        while link != NIL {
            let Edge { successor, next } = self.edges.release(link);
            out.push(successor);
            link = next;
        }
    }

    /// Release `task`'s slot for reuse once it is terminal and drained.
    pub fn retire(&mut self, task: TaskId) {
        let record = self.get_mut(task).expect("retiring a live task");
        assert!(record.status.is_terminal(), "retiring a non-terminal task");
        assert!(!record.has_successors(), "retiring with undrained successors");
        assert!(!record.retired);

        record.retired = true;
        self.live -= 1;
    }

    #[inline]
    pub fn edges_in_use(&self) -> u32 {
        self.edges.in_use()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(window: &mut TaskWindow) -> TaskId {
        window
            .insert(0, "kernel_noop", WorkerType::Vector, &[], 0)
            .unwrap()
    }

    fn complete_and_retire(window: &mut TaskWindow, id: TaskId) {
        window.get_mut(id).unwrap().status = TaskStatus::Completed;
        let mut sink = Vec::new();
        window.drain_successors(id, &mut sink);
        window.retire(id);
    }

    #[test]
    fn ids_are_monotonic() {
        let mut window = TaskWindow::new(4, 16);
        for expected in 0..4u32 {
            assert_eq!(insert(&mut window), TaskId(expected));
        }
        assert_eq!(window.live(), 4);
    }

    #[test]
    fn overflow_is_fatal_not_silent() {
        let mut window = TaskWindow::new(2, 16);
        insert(&mut window);
        insert(&mut window);
        let err = window
            .insert(0, "kernel_noop", WorkerType::Cube, &[], 0)
            .unwrap_err();
        assert_eq!(err, Fault::WindowExhausted { capacity: 2 });
        // The failed submission left no record behind.
        assert_eq!(window.live(), 2);
        assert!(window.get(TaskId(2)).is_none());
    }

    #[test]
    fn retired_slot_is_recycled_and_stale_ids_miss() {
        let mut window = TaskWindow::new(2, 16);
        let t0 = insert(&mut window);
        let _t1 = insert(&mut window);

        complete_and_retire(&mut window, t0);
        let t2 = insert(&mut window);
        assert_eq!(t2, TaskId(2));

        // t0's slot now belongs to t2; the stale id no longer resolves.
        assert!(window.get(t0).is_none());
        assert_eq!(window.get(t2).unwrap().id, t2);
    }

    #[test]
    fn successors_drain_in_submission_order() {
        let mut window = TaskWindow::new(8, 16);
        let t0 = insert(&mut window);
        let t1 = insert(&mut window);
        let t2 = insert(&mut window);
        let t3 = insert(&mut window);

        window.add_edge(t0, t1).unwrap();
        window.add_edge(t0, t2).unwrap();
        window.add_edge(t0, t3).unwrap();
        assert_eq!(window.edges_in_use(), 3);

        let mut out = Vec::new();
        window.drain_successors(t0, &mut out);
        assert_eq!(out, vec![t1, t2, t3]);
        assert_eq!(window.edges_in_use(), 0);
        assert!(!window.get(t0).unwrap().has_successors());
    }

    #[test]
    fn edge_pool_exhaustion_is_fatal() {
        let mut window = TaskWindow::new(8, 2);
        let t0 = insert(&mut window);
        let t1 = insert(&mut window);
        let t2 = insert(&mut window);
        let t3 = insert(&mut window);

        window.add_edge(t0, t2).unwrap();
        window.add_edge(t1, t3).unwrap();
        let err = window.add_edge(t0, t3).unwrap_err();
        assert_eq!(err, Fault::EdgePoolExhausted { capacity: 2 });
    }

    #[test]
    fn params_are_copied_into_the_record() {
        let mut window = TaskWindow::new(2, 4);
        let params = [Param::scalar(7), Param::scalar_f32(2.0)];
        let id = window
            .insert(3, "kernel_add_scalar", WorkerType::Vector, &params, 1)
            .unwrap();

        let record = window.get(id).unwrap();
        assert_eq!(record.params(), &params);
        assert_eq!(record.kernel_id, 3);
        assert_eq!(record.scope, 1);
        assert_eq!(record.status, TaskStatus::Pending);
    }

    #[test]
    #[should_panic(expected = "retiring a non-terminal task")]
    fn retire_requires_terminal_status() {
        let mut window = TaskWindow::new(2, 4);
        let id = insert(&mut window);
        window.retire(id);
    }
}
