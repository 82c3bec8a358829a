//! Buffer handles, tensor descriptors, and task parameters.
//!
//! These are the caller-visible value types of the submission surface. They
//! are deliberately plain `Copy` data: the orchestrator keeps all mutable
//! per-range state (versions, writer/reader history) in the overlap index,
//! so handles can be freely duplicated and captured by the host.

/// Monotonic task identity assigned at submission.
///
/// The task window stores the record at `id % capacity` and stamps the slot
/// with the id it holds, so a stale `TaskId` (one whose slot was recycled)
/// is detectable by comparing stamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

/// Heterogeneous execution unit a task is routed to.
///
/// Each worker type has its own ready queue; the value doubles as the queue
/// index, so the set is closed and dispatch needs no dynamic machinery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerType {
    /// Matrix unit: matmul, convolution.
    Cube = 0,
    /// Vector unit: element-wise, activation.
    Vector = 1,
}

/// Number of worker types; sizes the ready-queue array.
pub const NUM_WORKER_TYPES: usize = 2;

impl WorkerType {
    #[inline]
    pub fn queue_index(self) -> usize {
        self as usize
    }
}

/// Maximum params a single task record holds inline.
///
/// Submissions above this are rejected before graph mutation. Eight covers
/// every kernel signature in practice (binary op + scalar + sizes) while
/// keeping task records compact.
pub const MAX_TASK_PARAMS: usize = 8;

/// Who reclaims a buffer's storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Allocated from the scoped arena; reclaimed when its scope closes.
    Arena,
    /// Host-provided memory; never reclaimed by scope close.
    External,
}

/// A device buffer: address range plus lifetime bookkeeping.
///
/// The address is a raw device offset, not a host pointer; the orchestrator
/// only ever does range arithmetic on it. `scope` records the nesting depth
/// the buffer was allocated at (0 for external buffers opened before any
/// nested scope).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHandle {
    pub addr: u64,
    pub len: u32,
    pub scope: u8,
    pub ownership: Ownership,
}

impl BufferHandle {
    /// Wrap host-owned memory. External handles bypass arena reclamation.
    pub fn external(addr: u64, len: u32) -> Self {
        Self {
            addr,
            len,
            scope: 0,
            ownership: Ownership::External,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    /// Bounding-box view of the whole buffer with no version expectation.
    #[inline]
    pub fn desc(&self) -> TensorDesc {
        TensorDesc {
            addr: self.addr,
            len: self.len,
            expect_version: 0,
        }
    }
}

/// Bounding-box view of a buffer range used for overlap arithmetic.
///
/// `expect_version` is an assertion, not a generation scheme: zero means "no
/// expectation"; a nonzero value must match the overlap index's monotonic
/// version for the exact range or the submission is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub addr: u64,
    pub len: u32,
    pub expect_version: u32,
}

impl TensorDesc {
    pub fn new(addr: u64, len: u32) -> Self {
        Self {
            addr,
            len,
            expect_version: 0,
        }
    }

    /// Attach a version assertion checked at submission time.
    pub fn expect_version(mut self, version: u32) -> Self {
        self.expect_version = version;
        self
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.addr + u64::from(self.len)
    }

    /// Nonzero intersection test. Zero-length ranges never overlap.
    #[inline]
    pub fn overlaps(&self, addr: u64, len: u32) -> bool {
        self.len != 0 && len != 0 && self.addr < addr + u64::from(len) && addr < self.end()
    }
}

/// How a task touches a buffer param.
///
/// The access role drives hazard classification: readers conflict with
/// prior writers (RAW), writers conflict with prior writers (WAW) and prior
/// readers (WAR).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamRole {
    Input,
    Output,
    Inout,
}

impl ParamRole {
    #[inline]
    pub fn writes(self) -> bool {
        matches!(self, ParamRole::Output | ParamRole::Inout)
    }

    #[inline]
    pub fn reads(self) -> bool {
        matches!(self, ParamRole::Input | ParamRole::Inout)
    }
}

/// One positional parameter of a kernel invocation.
///
/// Buffer-bearing variants carry the descriptor used for overlap arithmetic;
/// `Scalar` carries a raw 64-bit payload and never participates in
/// dependency tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    Buffer { role: ParamRole, desc: TensorDesc },
    Scalar(u64),
}

impl Param {
    pub fn input(buf: &BufferHandle) -> Self {
        Param::Buffer {
            role: ParamRole::Input,
            desc: buf.desc(),
        }
    }

    pub fn output(buf: &BufferHandle) -> Self {
        Param::Buffer {
            role: ParamRole::Output,
            desc: buf.desc(),
        }
    }

    pub fn inout(buf: &BufferHandle) -> Self {
        Param::Buffer {
            role: ParamRole::Inout,
            desc: buf.desc(),
        }
    }

    pub fn scalar(value: u64) -> Self {
        Param::Scalar(value)
    }

    /// Encode an `f32` into the low bits of a scalar payload, the layout
    /// device kernels decode with a plain bit cast.
    pub fn scalar_f32(value: f32) -> Self {
        Param::Scalar(u64::from(value.to_bits()))
    }

    #[inline]
    pub fn desc(&self) -> Option<(ParamRole, TensorDesc)> {
        match self {
            Param::Buffer { role, desc } => Some((*role, *desc)),
            Param::Scalar(_) => None,
        }
    }
}

/// Hazard classification for an inferred dependency edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HazardKind {
    /// Read after write.
    Raw,
    /// Write after read.
    War,
    /// Write after write.
    Waw,
}

/// Lifecycle of a task record.
///
/// `Failed` and `Aborted` are terminal like `Completed`; scope barriers wait
/// for any terminal status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Submitted, unresolved dependencies remain.
    Pending,
    /// All dependencies resolved; queued for its worker type.
    Ready,
    /// Handed to the external dispatch layer.
    Dispatched,
    /// Execution finished successfully.
    Completed,
    /// The dispatch layer reported kernel failure.
    Failed,
    /// A transitive predecessor failed; never dispatched.
    Aborted,
}

impl TaskStatus {
    /// Terminal states release scope barriers and window slots.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_nonzero_intersection() {
        let d = TensorDesc::new(100, 50);
        assert!(d.overlaps(100, 50));
        assert!(d.overlaps(149, 1));
        assert!(d.overlaps(60, 41));
        assert!(!d.overlaps(150, 10)); // touching end is disjoint
        assert!(!d.overlaps(50, 50)); // touching start is disjoint
        assert!(!d.overlaps(0, 0));
        assert!(!TensorDesc::new(100, 0).overlaps(0, 1000));
    }

    #[test]
    fn roles_classify_reads_and_writes() {
        assert!(ParamRole::Input.reads());
        assert!(!ParamRole::Input.writes());
        assert!(ParamRole::Output.writes());
        assert!(!ParamRole::Output.reads());
        assert!(ParamRole::Inout.reads());
        assert!(ParamRole::Inout.writes());
    }

    #[test]
    fn scalar_f32_round_trips() {
        let p = Param::scalar_f32(1.5);
        match p {
            Param::Scalar(bits) => assert_eq!(f32::from_bits(bits as u32), 1.5),
            _ => unreachable!(),
        }
        assert!(p.desc().is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Aborted.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Ready.is_terminal());
        assert!(!TaskStatus::Dispatched.is_terminal());
    }
}
