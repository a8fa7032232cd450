//! Per-call synchronization: completion barrier and error aggregation.

mod exception_slot;
mod latch;

pub use exception_slot::ExceptionSlot;
pub use latch::Latch;
