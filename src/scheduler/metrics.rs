//! # Metrics Module
//!
//! Per-worker counters for the pool, merged after the workers join.
//!
//! ## Design
//!
//! - **Per-worker local metrics**: hot path updates are plain integer ops
//! - **Cache-line aligned**: workers never share a line
//! - **Log2 histogram**: task run time, O(1) record
//! - **Post-run aggregation**: merged in [`ThreadPool::join`](super::ThreadPool::join)
//!
//! Counters that are bumped from non-worker threads (external posts, small
//! stack posts) live as relaxed atomics in the pool's shared state and are
//! folded into the snapshot at join time.

/// Log2 histogram. Bucket k covers `[2^k, 2^(k+1))`; bucket 0 covers `[0, 2)`.
///
/// ~50% error margin: good enough to tell microsecond tasks from
/// millisecond ones.
#[derive(Clone, Debug)]
pub struct Log2Hist {
    pub buckets: [u64; 64],
    pub count: u64,
    pub sum: u64,
}

impl Default for Log2Hist {
    fn default() -> Self {
        Self::new()
    }
}

impl Log2Hist {
    pub const fn new() -> Self {
        Self {
            buckets: [0; 64],
            count: 0,
            sum: 0,
        }
    }

    #[inline(always)]
    pub fn record(&mut self, v: u64) {
        let b = bucket_index(v);
        self.buckets[b] = self.buckets[b].wrapping_add(1);
        self.count = self.count.wrapping_add(1);
        self.sum = self.sum.wrapping_add(v);
    }

    /// Lower bound of the bucket holding percentile `p` (`0.0..=1.0`).
    pub fn percentile_lower_bound(&self, p: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        debug_assert!((0.0..=1.0).contains(&p), "percentile must be in [0.0, 1.0]");

        let target = ((self.count as f64) * p).ceil() as u64;
        let mut seen = 0u64;
        for (i, &c) in self.buckets.iter().enumerate() {
            seen = seen.wrapping_add(c);
            if seen >= target {
                return Some(bucket_lower_bound(i));
            }
        }
        Some(1u64 << 63)
    }

    #[inline]
    pub fn p99(&self) -> Option<u64> {
        self.percentile_lower_bound(0.99)
    }

    #[inline]
    pub fn mean(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum / self.count
        }
    }

    pub fn merge(&mut self, other: &Log2Hist) {
        for (a, b) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *a = a.wrapping_add(*b);
        }
        self.count = self.count.wrapping_add(other.count);
        self.sum = self.sum.wrapping_add(other.sum);
    }
}

#[inline(always)]
fn bucket_index(v: u64) -> usize {
    if v == 0 {
        return 0;
    }
    (63 - v.leading_zeros()) as usize
}

#[inline]
fn bucket_lower_bound(bucket: usize) -> u64 {
    if bucket == 0 {
        0
    } else {
        1u64 << bucket
    }
}

/// Per-worker local metrics.
///
/// NOT thread-safe: owned by the worker's thread-local slot and handed back
/// when the worker exits.
#[derive(Clone, Debug, Default)]
#[repr(align(64))]
pub struct WorkerMetricsLocal {
    /// Jobs executed by the worker loop.
    pub tasks_executed: u64,
    /// Jobs pushed onto this worker's own deque.
    pub tasks_enqueued: u64,
    /// Jobs taken from the own deque.
    pub local_pops: u64,
    /// Jobs taken from the own mailbox (placement-hinted work).
    pub mailbox_pops: u64,
    /// Jobs taken from the global injector.
    pub injector_pops: u64,
    /// Failed steal attempts.
    pub steal_attempts: u64,
    /// Successful steals (victim deque or victim mailbox).
    pub steal_successes: u64,
    /// Jobs executed while blocked in a helping wait.
    pub helped_tasks: u64,
    /// Deepest stack of nested helping waits seen on this worker.
    pub max_help_depth: u64,

    /// Times the worker parked.
    pub park_count: u64,

    /// Job run time in nanoseconds.
    pub task_time_ns: Log2Hist,
}

const _: () = {
    assert!(std::mem::align_of::<WorkerMetricsLocal>() >= 64);
};

impl WorkerMetricsLocal {
    /// Fraction of popped jobs that came from the worker's own deque or mailbox.
    pub fn local_hit_rate(&self) -> f64 {
        let own = self.local_pops.wrapping_add(self.mailbox_pops);
        let total = own
            .wrapping_add(self.injector_pops)
            .wrapping_add(self.steal_successes);
        if total == 0 {
            0.0
        } else {
            own as f64 / total as f64
        }
    }
}

/// Aggregated metrics from all workers.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub tasks_enqueued: u64,
    pub tasks_executed: u64,
    pub local_pops: u64,
    pub mailbox_pops: u64,
    pub injector_pops: u64,
    pub steal_attempts: u64,
    pub steal_successes: u64,
    pub helped_tasks: u64,
    /// Deepest nesting of helping waits on any worker.
    pub max_help_depth: u64,
    pub park_count: u64,
    pub task_time_ns: Log2Hist,

    /// Jobs submitted from threads outside the pool.
    pub external_posts: u64,
    /// Jobs submitted with the small-stack hint (bulk spawner tasks).
    pub small_stack_tasks: u64,

    /// Number of workers merged.
    pub worker_count: u32,
}

impl MetricsSnapshot {
    /// Fold one worker's counters in. Call once per worker after it joins.
    pub fn merge_worker(&mut self, w: &WorkerMetricsLocal) {
        self.tasks_enqueued = self.tasks_enqueued.wrapping_add(w.tasks_enqueued);
        self.tasks_executed = self.tasks_executed.wrapping_add(w.tasks_executed);
        self.local_pops = self.local_pops.wrapping_add(w.local_pops);
        self.mailbox_pops = self.mailbox_pops.wrapping_add(w.mailbox_pops);
        self.injector_pops = self.injector_pops.wrapping_add(w.injector_pops);
        self.steal_attempts = self.steal_attempts.wrapping_add(w.steal_attempts);
        self.steal_successes = self.steal_successes.wrapping_add(w.steal_successes);
        self.helped_tasks = self.helped_tasks.wrapping_add(w.helped_tasks);
        self.max_help_depth = self.max_help_depth.max(w.max_help_depth);
        self.park_count = self.park_count.wrapping_add(w.park_count);
        self.task_time_ns.merge(&w.task_time_ns);
        self.worker_count = self.worker_count.wrapping_add(1);
    }

    /// Steal success rate: `steal_successes / (steal_successes + steal_attempts)`.
    pub fn steal_rate(&self) -> f64 {
        let total = self.steal_successes.wrapping_add(self.steal_attempts);
        if total == 0 {
            0.0
        } else {
            self.steal_successes as f64 / total as f64
        }
    }
}
