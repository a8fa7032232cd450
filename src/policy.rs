//! Execution policies: where work runs and how it is spread.
//!
//! A policy is read-only during a call. Per-context derivation
//! ([`ExecutionPolicy::with_hint`]) copies the policy and overrides only the
//! core hint, which is how a bulk operation pins one context's work to one
//! worker.

use crate::exec::Executor;
use crate::shape::ChunkSize;

/// Default partition size above which a worker context delegates
/// submission to a spawner task.
pub const DEFAULT_HIERARCHICAL_THRESHOLD: usize = 6;

/// Static (blocking) or task (future-returning) execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LaunchMode {
    #[default]
    Sync,
    Async,
}

/// How item indices are assigned to worker contexts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlacementHint {
    /// Contiguous blocks, submitted low to high.
    #[default]
    DepthFirst,
    /// Contiguous blocks, submitted high to low.
    DepthFirstReverse,
    /// Stride-`P` interleaving, submitted low to high.
    BreadthFirst,
    /// Stride-`P` interleaving, submitted high to low.
    BreadthFirstReverse,
}

impl PlacementHint {
    pub const ALL: [PlacementHint; 4] = [
        PlacementHint::DepthFirst,
        PlacementHint::DepthFirstReverse,
        PlacementHint::BreadthFirst,
        PlacementHint::BreadthFirstReverse,
    ];

    #[inline]
    pub fn is_breadth_first(self) -> bool {
        matches!(
            self,
            PlacementHint::BreadthFirst | PlacementHint::BreadthFirstReverse
        )
    }

    #[inline]
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            PlacementHint::DepthFirstReverse | PlacementHint::BreadthFirstReverse
        )
    }
}

/// Stack request for a posted job.
///
/// The pool has no per-job stacks; `Small` marks lightweight bookkeeping
/// jobs (bulk spawners) and is counted in
/// [`MetricsSnapshot::small_stack_tasks`](crate::scheduler::MetricsSnapshot::small_stack_tasks).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StackSize {
    #[default]
    Default,
    Small,
}

/// Per-job scheduling hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScheduleHint {
    /// Preferred worker context (taken modulo the pool size).
    pub worker: Option<usize>,
    pub stack: StackSize,
}

impl ScheduleHint {
    pub const NONE: ScheduleHint = ScheduleHint {
        worker: None,
        stack: StackSize::Default,
    };

    #[inline]
    pub fn worker(worker: usize) -> Self {
        Self {
            worker: Some(worker),
            stack: StackSize::Default,
        }
    }

    #[inline]
    pub fn with_stack(mut self, stack: StackSize) -> Self {
        self.stack = stack;
        self
    }
}

/// Chunking and throughput tuning for one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionParameters {
    pub chunk_size: ChunkSize,
    /// Partitions strictly larger than this get a spawner task.
    pub hierarchical_threshold: usize,
    /// First worker context used by bulk operations.
    pub first_worker: usize,
    /// Worker contexts used by bulk operations; `None` = all from `first_worker`.
    pub num_workers: Option<usize>,
}

impl Default for ExecutionParameters {
    fn default() -> Self {
        Self {
            chunk_size: ChunkSize::Auto,
            hierarchical_threshold: DEFAULT_HIERARCHICAL_THRESHOLD,
            first_worker: 0,
            num_workers: None,
        }
    }
}

impl ExecutionParameters {
    /// Worker window `(first, count)` clamped to a pool of `pool_workers`.
    ///
    /// Always yields at least one context.
    pub fn worker_window(&self, pool_workers: usize) -> (usize, usize) {
        let pool_workers = pool_workers.max(1);
        let first = self.first_worker.min(pool_workers - 1);
        let available = pool_workers - first;
        let count = self
            .num_workers
            .map_or(available, |n| n.clamp(1, available));
        (first, count)
    }
}

/// Executor plus per-call knobs.
#[derive(Clone, Debug)]
pub struct ExecutionPolicy<E> {
    executor: E,
    params: ExecutionParameters,
    launch: LaunchMode,
    placement: PlacementHint,
    core_hint: Option<usize>,
}

impl<E: Executor> ExecutionPolicy<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            params: ExecutionParameters::default(),
            launch: LaunchMode::Sync,
            placement: PlacementHint::DepthFirst,
            core_hint: None,
        }
    }

    /// Same policy, non-blocking.
    pub fn task(&self) -> Self {
        self.clone().with_launch(LaunchMode::Async)
    }

    pub fn with_params(mut self, params: ExecutionParameters) -> Self {
        self.params = params;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: ChunkSize) -> Self {
        self.params.chunk_size = chunk_size;
        self
    }

    pub fn with_hierarchical_threshold(mut self, threshold: usize) -> Self {
        self.params.hierarchical_threshold = threshold;
        self
    }

    pub fn with_launch(mut self, launch: LaunchMode) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_placement(mut self, placement: PlacementHint) -> Self {
        self.placement = placement;
        self
    }

    /// Derived copy pinned to worker context `core`.
    pub fn with_hint(&self, core: usize) -> Self {
        let mut p = self.clone();
        p.core_hint = Some(core);
        p
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn params(&self) -> &ExecutionParameters {
        &self.params
    }

    pub fn launch(&self) -> LaunchMode {
        self.launch
    }

    pub fn placement(&self) -> PlacementHint {
        self.placement
    }

    pub fn core_hint(&self) -> Option<usize> {
        self.core_hint
    }

    /// Schedule hint for a job submitted under this policy.
    pub fn schedule_hint(&self) -> ScheduleHint {
        ScheduleHint {
            worker: self.core_hint,
            stack: StackSize::Default,
        }
    }
}
