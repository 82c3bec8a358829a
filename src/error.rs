//! Fault model for the orchestration runtime.
//!
//! Every capacity limit (task window, edge pool, index pools, scope depth,
//! arena bytes) is fixed when the orchestrator is built. Exceeding one is a
//! caller sizing bug, so faults are fatal and immediate: the failing call
//! returns the fault, nothing blocks, and no partial graph state is left
//! behind by the failing submission.
//!
//! Hosts that cannot unwind a Rust error observe faults as a numeric
//! [`FaultCode`] via [`Fault::code`].

use std::fmt;

use crate::tensor::TaskId;

/// Fatal orchestration fault.
///
/// Resource-exhaustion variants carry the configured capacity so the host
/// can report what to resize. Malformed-submission variants are raised
/// before any graph mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Task window has no retired slot for the next task id.
    WindowExhausted { capacity: u32 },
    /// Dependency-edge pool is out of successor nodes.
    EdgePoolExhausted { capacity: u32 },
    /// Overlap-index entry or link pool is out of nodes.
    IndexPoolExhausted { capacity: u32 },
    /// `open_scope` would exceed the maximum nesting depth.
    ScopeDepthExceeded { max_depth: u8 },
    /// `close_scope` with no open scope.
    ScopeUnderflow,
    /// Orchestration teardown with scopes still open.
    UnclosedScope { depth: u8 },
    /// Arena cannot satisfy an allocation of `requested` bytes.
    ArenaExhausted { requested: u64, available: u64 },
    /// Argument vector length differs from the producer contract.
    ArgCountMismatch { expected: u32, actual: u32 },
    /// INPUT/INOUT param references a null/zero-address buffer.
    NullBuffer { param_index: u8 },
    /// Submission carries more params than a task record can hold.
    TooManyParams { count: usize },
    /// Nonzero `expect_version` did not match the range's current version.
    VersionMismatch {
        expected: u32,
        actual: u32,
        param_index: u8,
    },
    /// Completion signal names a task id the window does not hold.
    UnknownTask { task: TaskId },
}

impl Fault {
    /// Host-observable status code. Stable across releases; zero is
    /// reserved for "no fault".
    pub fn code(&self) -> FaultCode {
        let raw = match self {
            Fault::WindowExhausted { .. } => 1,
            Fault::EdgePoolExhausted { .. } => 2,
            Fault::IndexPoolExhausted { .. } => 3,
            Fault::ScopeDepthExceeded { .. } => 4,
            Fault::ScopeUnderflow => 5,
            Fault::UnclosedScope { .. } => 12,
            Fault::ArenaExhausted { .. } => 6,
            Fault::ArgCountMismatch { .. } => 7,
            Fault::NullBuffer { .. } => 8,
            Fault::TooManyParams { .. } => 9,
            Fault::VersionMismatch { .. } => 10,
            Fault::UnknownTask { .. } => 11,
        };
        FaultCode(raw)
    }

    /// True for faults caused by a fixed capacity running out.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Fault::WindowExhausted { .. }
                | Fault::EdgePoolExhausted { .. }
                | Fault::IndexPoolExhausted { .. }
                | Fault::ScopeDepthExceeded { .. }
                | Fault::ArenaExhausted { .. }
        )
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::WindowExhausted { capacity } => {
                write!(f, "task window exhausted (capacity {capacity})")
            }
            Fault::EdgePoolExhausted { capacity } => {
                write!(f, "dependency-edge pool exhausted (capacity {capacity})")
            }
            Fault::IndexPoolExhausted { capacity } => {
                write!(f, "overlap-index pool exhausted (capacity {capacity})")
            }
            Fault::ScopeDepthExceeded { max_depth } => {
                write!(f, "scope nesting exceeds max depth {max_depth}")
            }
            Fault::ScopeUnderflow => write!(f, "close_scope without matching open_scope"),
            Fault::UnclosedScope { depth } => {
                write!(f, "orchestration teardown with {depth} scope(s) still open")
            }
            Fault::ArenaExhausted {
                requested,
                available,
            } => write!(
                f,
                "arena exhausted: requested {requested} bytes, {available} available"
            ),
            Fault::ArgCountMismatch { expected, actual } => {
                write!(f, "argument count mismatch: expected {expected}, got {actual}")
            }
            Fault::NullBuffer { param_index } => {
                write!(f, "param {param_index} references a null buffer")
            }
            Fault::TooManyParams { count } => {
                write!(f, "submission carries {count} params, limit is {}", crate::tensor::MAX_TASK_PARAMS)
            }
            Fault::VersionMismatch {
                expected,
                actual,
                param_index,
            } => write!(
                f,
                "param {param_index} expects buffer version {expected}, index holds {actual}"
            ),
            Fault::UnknownTask { task } => write!(f, "unknown task id {}", task.0),
        }
    }
}

impl std::error::Error for Fault {}

/// Numeric fault code surfaced to the host at orchestration abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultCode(pub i32);

impl FaultCode {
    pub const NONE: FaultCode = FaultCode(0);
}
