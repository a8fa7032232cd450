//! End-to-end tests over a real pool.
//!
//! Run with: `cargo test --test integration`

mod hierarchical_spawn;
mod scan_partitioner;

use fanout_rs::{ExecutorConfig, ThreadPool};

pub(crate) fn pool(workers: usize) -> ThreadPool {
    ThreadPool::new(ExecutorConfig {
        workers,
        seed: 0x5eed_0000 + workers as u64,
        ..ExecutorConfig::default()
    })
}
