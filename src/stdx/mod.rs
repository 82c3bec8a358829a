//! Small, self-contained fixed-capacity structures used across the runtime.

pub mod ready_ring;
pub mod slot_pool;

pub use ready_ring::ReadyRing;
pub use slot_pool::{SlotPool, NIL};
