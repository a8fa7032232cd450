//! Work-stealing pool that runs the core's jobs.
//!
//! - [`executor`]: [`ThreadPool`], [`PoolHandle`], [`ExecutorConfig`]
//! - [`executor_core`]: state word, pop order and idle policy shared by the
//!   worker loop and helping waits
//! - [`metrics`]: per-worker counters merged at join
//! - [`rng`]: victim selection
//! - [`worker_id`]: thread-local worker identity

pub mod executor;
pub(crate) mod executor_core;
pub mod metrics;
pub mod rng;
pub mod worker_id;

pub(crate) use executor::help_until;
pub use executor::{ExecutorConfig, Job, PoolHandle, ThreadPool, UNRESTRICTED_HELP_DEPTH};
pub use metrics::{Log2Hist, MetricsSnapshot, WorkerMetricsLocal};
pub use worker_id::current_worker_id;
