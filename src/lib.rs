//! Bulk-work distribution over a work-stealing pool.
//!
//! ## Scope
//! Runs a function over every element of a work shape and hands back per-item
//! futures (value mode) or one completion for the batch (void mode), plus a
//! four-phase scan partitioner built on the same bulk machinery.
//!
//! ## Key invariants
//! - Every item of a bulk call runs exactly once, on exactly one partition.
//! - A bulk call never returns while its latch still counts outstanding work.
//! - Void-mode and scan calls report the *first* failure, and only after every
//!   item they started has finished.
//! - A blocking wait issued on a pool worker helps the pool instead of
//!   parking, so nested waits cannot starve a fixed-size pool.
//!
//! ## Flow (one bulk call)
//! `shape -> PartitionDescriptor::plan -> {inline | spawner | direct} -> leaves -> Latch`
//!
//! ## Notable entry points
//! - [`ThreadPool`] / [`ExecutorConfig`]: the pool.
//! - [`Executor`], [`PoolExecutor`], [`InlineExecutor`]: where work runs.
//! - [`bulk::bulk_async_execute`], [`bulk::bulk_post`],
//!   [`bulk::bulk_then_execute`]: hierarchical bulk submission.
//! - [`scan::scan_partitioner`]: static or task scan by [`LaunchMode`].
//!
//! ## Design trade-offs
//! Posting `N` leaves from the caller costs `N` pushes on one thread; the
//! hierarchical spawner spends one extra small task per large partition to
//! spread those pushes over `P` workers. Below the threshold the extra task
//! costs more than it saves, so small partitions are posted inline.

pub mod bulk;
pub mod error;
pub mod exec;
pub mod future;
pub mod policy;
pub mod scan;
pub mod scheduler;
pub mod shape;
pub mod sync;
#[cfg(test)]
pub mod test_utils;

pub use bulk::{BulkLaunch, Partition, PartitionDescriptor};
pub use error::{ErrorKind, Result, TaskError};
pub use exec::{Executor, InlineExecutor, PoolExecutor};
pub use future::{wait_all, Promise, TaskFuture};
pub use policy::{
    ExecutionParameters, ExecutionPolicy, LaunchMode, PlacementHint, ScheduleHint, StackSize,
};
pub use scan::{scan_partitioner, scan_static, scan_task, ScanPhase};
pub use scheduler::{ExecutorConfig, MetricsSnapshot, ThreadPool};
pub use shape::{chunk_shape, Chunk, ChunkSize, WorkShape};
pub use sync::{ExceptionSlot, Latch};
