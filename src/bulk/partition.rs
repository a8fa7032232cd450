//! Index partition planner.
//!
//! Splits `N` items over `P` worker contexts. Every placement yields
//! disjoint partitions whose union is exactly `[0, N)`:
//!
//! | Placement | Context `t` owns | Submission order |
//! |-----------|------------------|------------------|
//! | depth-first | `[⌊tN/P⌋, ⌊(t+1)N/P⌋)` | ascending |
//! | depth-first-reverse | same block | descending |
//! | breadth-first | `t, t+P, t+2P, … < N` | ascending |
//! | breadth-first-reverse | same stride set | descending |
//!
//! With `P > N` the high contexts get empty partitions; that is a no-op,
//! not an error.

use crate::error::{ErrorKind, Result, TaskError};
use crate::policy::{ExecutionParameters, ExecutionPolicy, PlacementHint};

use super::index_queue::IndexQueue;

/// Indices `begin, begin+stride, …`, `len` of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partition {
    pub begin: usize,
    pub len: usize,
    pub stride: usize,
}

impl Partition {
    pub const EMPTY: Partition = Partition {
        begin: 0,
        len: 0,
        stride: 1,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last owned index (`begin` when empty).
    #[inline]
    pub fn end(&self) -> usize {
        if self.len == 0 {
            self.begin
        } else {
            self.begin + (self.len - 1) * self.stride + 1
        }
    }

    #[inline]
    pub fn get(&self, k: usize) -> usize {
        debug_assert!(k < self.len);
        self.begin + k * self.stride
    }

    /// Owned indices in ascending order.
    pub fn indices(&self) -> impl DoubleEndedIterator<Item = usize> + ExactSizeIterator + '_ {
        (0..self.len).map(move |k| self.get(k))
    }

    /// Claimable queue over this partition.
    pub fn queue(&self) -> Result<IndexQueue> {
        IndexQueue::new(self.begin, self.len, self.stride)
    }
}

/// Contiguous block `[⌊tN/P⌋, ⌊(t+1)N/P⌋)`.
pub fn depth_first(n: usize, p: usize, t: usize) -> Partition {
    debug_assert!(p > 0 && t < p);
    // u128 keeps t*N exact for any usize N.
    let bound = |k: usize| ((k as u128 * n as u128) / p as u128) as usize;
    let begin = bound(t);
    Partition {
        begin,
        len: bound(t + 1) - begin,
        stride: 1,
    }
}

/// Stride-`P` set `{t, t+P, …} ∩ [0, N)`: `⌈(N−t)/P⌉` indices for `t < N`.
pub fn breadth_first(n: usize, p: usize, t: usize) -> Partition {
    debug_assert!(p > 0 && t < p);
    if t >= n {
        return Partition {
            begin: t,
            len: 0,
            stride: p,
        };
    }
    Partition {
        begin: t,
        len: (n - t).div_ceil(p),
        stride: p,
    }
}

/// Partition of context `t` of `p` over `n` items.
pub fn partition(n: usize, p: usize, t: usize, placement: PlacementHint) -> Partition {
    if placement.is_breadth_first() {
        breadth_first(n, p, t)
    } else {
        depth_first(n, p, t)
    }
}

/// Largest item count a bulk call accepts.
pub const MAX_BULK_ITEMS: usize = u32::MAX as usize;

pub(crate) fn check_len(n: usize, function: &'static str) -> Result<()> {
    if n > MAX_BULK_ITEMS {
        return Err(TaskError::new(
            ErrorKind::BadParameter,
            format!("bulk shape of {n} items exceeds {MAX_BULK_ITEMS}"),
        )
        .with_function(function));
    }
    Ok(())
}

/// Bulk knobs taken from a policy, not yet bound to a pool size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulkLaunch {
    pub placement: PlacementHint,
    pub hierarchical_threshold: usize,
    pub first_worker: usize,
    pub num_workers: Option<usize>,
}

impl Default for BulkLaunch {
    fn default() -> Self {
        Self::new(&ExecutionParameters::default(), PlacementHint::default())
    }
}

impl BulkLaunch {
    pub fn new(params: &ExecutionParameters, placement: PlacementHint) -> Self {
        Self {
            placement,
            hierarchical_threshold: params.hierarchical_threshold,
            first_worker: params.first_worker,
            num_workers: params.num_workers,
        }
    }

    pub fn from_policy<E: crate::exec::Executor>(policy: &ExecutionPolicy<E>) -> Self {
        Self::new(policy.params(), policy.placement())
    }

    /// Bind to a pool of `pool_workers` contexts.
    pub fn resolve(&self, pool_workers: usize) -> PartitionDescriptor {
        let params = ExecutionParameters {
            first_worker: self.first_worker,
            num_workers: self.num_workers,
            ..ExecutionParameters::default()
        };
        let (first_worker, num_workers) = params.worker_window(pool_workers);
        PartitionDescriptor {
            first_worker,
            num_workers,
            hierarchical_threshold: self.hierarchical_threshold,
            placement: self.placement,
        }
    }
}

/// Which bulk flavour a plan is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkMode {
    /// One future per item.
    Value,
    /// Single aggregated completion.
    Void,
}

/// What the dispatching loop does with one context's partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing owned.
    Empty,
    /// The calling context submits every item itself.
    Inline,
    /// The calling context submits all but one item and runs that one directly.
    InlineDirect,
    /// A spawner job submits the items.
    Spawner,
}

/// Per-context decision of a bulk call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextPlan {
    /// Context index in `0..num_workers`.
    pub context: usize,
    /// Pool worker hinted for this context's jobs.
    pub worker: usize,
    pub partition: Partition,
    pub dispatch: Dispatch,
}

/// `(first_worker, num_workers, hierarchical_threshold)` plus placement,
/// bound to a concrete pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub first_worker: usize,
    pub num_workers: usize,
    pub hierarchical_threshold: usize,
    pub placement: PlacementHint,
}

impl PartitionDescriptor {
    #[inline]
    pub fn partition(&self, n: usize, context: usize) -> Partition {
        partition(n, self.num_workers, context, self.placement)
    }

    #[inline]
    pub fn worker(&self, context: usize) -> usize {
        self.first_worker + context
    }

    /// Per-context dispatch decisions for `n` items.
    ///
    /// A partition strictly larger than the threshold gets a spawner. In void
    /// mode the last context never does: it is drained by the caller, which
    /// keeps one index for direct execution.
    pub fn plan(&self, n: usize, mode: BulkMode) -> Vec<ContextPlan> {
        let last = self.num_workers - 1;
        (0..self.num_workers)
            .map(|t| {
                let partition = self.partition(n, t);
                let dispatch = if partition.is_empty() {
                    Dispatch::Empty
                } else {
                    match mode {
                        BulkMode::Value if partition.len > self.hierarchical_threshold => {
                            Dispatch::Spawner
                        }
                        BulkMode::Value => Dispatch::Inline,
                        BulkMode::Void if t == last => Dispatch::InlineDirect,
                        BulkMode::Void if partition.len > self.hierarchical_threshold => {
                            Dispatch::Spawner
                        }
                        BulkMode::Void => Dispatch::Inline,
                    }
                };
                ContextPlan {
                    context: t,
                    worker: self.worker(t),
                    partition,
                    dispatch,
                }
            })
            .collect()
    }
}
