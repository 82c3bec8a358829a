//! Fixed-capacity FIFO ring of task ids, capacity chosen at init.
//!
//! One ring backs each worker type's ready queue. Capacity equals the task
//! window capacity, so a push can only fail on a bookkeeping bug; the ring
//! still surfaces the failure as `Err` instead of growing, keeping memory
//! behavior identical on host and device.
//!
//! # Invariants
//! - Capacity is rounded up to a power of 2 so wraparound is a bitwise AND.
//! - `head < capacity` and `len <= capacity`.
//! - The element at logical index `i` lives at `(head + i) & mask`.
//!
//! # Threading
//! Not synchronized; the single control thread owns all rings.

use crate::tensor::TaskId;

/// Single-threaded FIFO ring with a hard capacity.
pub struct ReadyRing {
    buf: Box<[TaskId]>,
    head: u32,
    len: u32,
}

impl ReadyRing {
    /// Build a ring that holds at least `capacity` elements.
    pub fn with_capacity(capacity: u32) -> Self {
        assert!(capacity > 0, "ready ring capacity must be > 0");
        assert!(capacity <= u32::MAX / 2, "ready ring capacity overflow");

        let rounded = capacity.next_power_of_two();
        let buf = vec![TaskId(u32::MAX); rounded as usize].into_boxed_slice();

        Self { buf, head: 0, len: 0 }
    }

    #[inline]
    fn mask(&self) -> u32 {
        self.buf.len() as u32 - 1
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.buf.len() as u32
    }

    #[inline]
    pub fn len(&self) -> u32 {
        debug_assert!(self.len <= self.capacity());
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `task`, or return it back when the ring is full.
    pub fn push(&mut self, task: TaskId) -> Result<(), TaskId> {
        if self.len == self.capacity() {
            return Err(task);
        }
        let slot = (self.head + self.len) & self.mask();
        self.buf[slot as usize] = task;
        self.len += 1;
        Ok(())
    }

    /// Remove and return the oldest task.
    pub fn pop(&mut self) -> Option<TaskId> {
        if self.len == 0 {
            return None;
        }
        let task = self.buf[self.head as usize];
        self.head = (self.head + 1) & self.mask();
        self.len -= 1;
        Some(task)
    }

    /// Oldest task without removing it.
    #[inline]
    pub fn peek(&self) -> Option<TaskId> {
        if self.len == 0 {
            None
        } else {
            Some(self.buf[self.head as usize])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut ring = ReadyRing::with_capacity(4);
        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);

        for i in 0..4 {
            ring.push(TaskId(i)).unwrap();
        }
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.push(TaskId(99)), Err(TaskId(99)));

        for i in 0..4 {
            assert_eq!(ring.peek(), Some(TaskId(i)));
            assert_eq!(ring.pop(), Some(TaskId(i)));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn wraps_around() {
        let mut ring = ReadyRing::with_capacity(3); // rounds to 4
        assert_eq!(ring.capacity(), 4);

        for round in 0..10u32 {
            ring.push(TaskId(round * 2)).unwrap();
            ring.push(TaskId(round * 2 + 1)).unwrap();
            assert_eq!(ring.pop(), Some(TaskId(round * 2)));
            assert_eq!(ring.pop(), Some(TaskId(round * 2 + 1)));
        }
        assert!(ring.is_empty());
    }
}

#[cfg(all(test, feature = "stdx-proptest"))]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[derive(Clone, Debug)]
    enum Op {
        Push(u32),
        Pop,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![any::<u32>().prop_map(Op::Push), Just(Op::Pop)]
    }

    const PROPTEST_CASES: u32 = 64;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            crate::test_utils::proptest_cases(PROPTEST_CASES)
        ))]

        #[test]
        fn prop_matches_vecdeque(
            cap in 1u32..64,
            ops in prop::collection::vec(op_strategy(), 0..256)
        ) {
            let mut ring = ReadyRing::with_capacity(cap);
            let mut shadow = VecDeque::new();

            for op in ops {
                match op {
                    Op::Push(v) => {
                        let ok = ring.push(TaskId(v)).is_ok();
                        if ok {
                            shadow.push_back(TaskId(v));
                        } else {
                            prop_assert_eq!(shadow.len() as u32, ring.capacity());
                        }
                    }
                    Op::Pop => {
                        prop_assert_eq!(ring.pop(), shadow.pop_front());
                    }
                }
                prop_assert_eq!(ring.len() as usize, shadow.len());
                prop_assert_eq!(ring.peek(), shadow.front().copied());
            }
        }
    }
}
