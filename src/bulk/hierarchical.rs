//! Hierarchical bulk spawner.
//!
//! # Dispatch
//!
//! ```text
//!   caller ──┬── context 0: |part| > threshold ──► spawner job ──► leaf, leaf, …
//!            ├── context 1: |part| ≤ threshold ──► leaf, leaf, …   (caller posts)
//!            ├── …
//!            └── context P-1 ─────────────────────► leaf, …, run reserved index
//!                                                                    directly
//!   caller: latch.wait()
//! ```
//!
//! Posting `N` leaves from one thread serializes on that thread's queue
//! pushes. Large partitions are handed to a spawner job (small-stack hint,
//! pinned to the partition's worker) so the pushes happen on `P` workers in
//! parallel; small partitions are posted by the caller directly.
//!
//! # Per-call context
//!
//! All state a call shares with its jobs (items, function, latch, error
//! slot, result slots) lives in one `Arc`'d call object. Jobs hold a clone;
//! nothing is borrowed across a job boundary.
//!
//! # Modes
//!
//! - **Value** ([`bulk_async_execute`]): one future per item. The latch
//!   counts *submissions*: the call returns as soon as every slot holds a
//!   future. Item failures stay in their own future.
//! - **Void** ([`bulk_post`], [`bulk_sync_execute`]): items run through a
//!   guarded wrapper that records the first failure in an
//!   [`ExceptionSlot`] and always counts the latch down. The call waits for
//!   every item, then returns that first failure, if any.

use std::sync::{Arc, OnceLock};

use tracing::{debug, trace};

use super::index_queue::IndexQueue;
use super::partition::{check_len, BulkLaunch, BulkMode, Dispatch, Partition, PartitionDescriptor};
use crate::error::{self, Result, TaskError};
use crate::exec::Executor;
use crate::future::TaskFuture;
use crate::policy::{ScheduleHint, StackSize};
use crate::scheduler::Job;
use crate::sync::{ExceptionSlot, Latch};

#[inline]
fn spawner_hint(worker: usize) -> ScheduleHint {
    ScheduleHint::worker(worker).with_stack(StackSize::Small)
}

fn log_dispatch(mode: BulkMode, n: usize, desc: &PartitionDescriptor) {
    debug!(
        ?mode,
        items = n,
        contexts = desc.num_workers,
        first_worker = desc.first_worker,
        threshold = desc.hierarchical_threshold,
        placement = ?desc.placement,
        "bulk dispatch"
    );
}

// ============================================================================
// Value mode
// ============================================================================

struct ValueCall<E, I, R, F> {
    executor: E,
    items: Arc<[I]>,
    f: Arc<F>,
    results: Box<[OnceLock<TaskFuture<R>>]>,
    latch: Latch,
}

impl<E, I, R, F> ValueCall<E, I, R, F>
where
    E: Executor,
    I: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&I) -> R + Send + Sync + 'static,
{
    fn submit(&self, worker: usize, i: usize) {
        let f = Arc::clone(&self.f);
        let items = Arc::clone(&self.items);
        let fut = self
            .executor
            .async_execute(ScheduleHint::worker(worker), move || f(&items[i]));
        // Partitions are disjoint: each slot is written exactly once.
        let _ = self.results[i].set(fut);
        self.latch.count_down(1);
    }

    fn submit_partition(&self, worker: usize, part: Partition, reverse: bool) {
        if reverse {
            part.indices().rev().for_each(|i| self.submit(worker, i));
        } else {
            part.indices().for_each(|i| self.submit(worker, i));
        }
    }
}

fn run_value<E, I, R, F>(
    executor: &E,
    launch: &BulkLaunch,
    f: F,
    items: Arc<[I]>,
) -> Result<Vec<TaskFuture<R>>>
where
    E: Executor,
    I: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&I) -> R + Send + Sync + 'static,
{
    let n = items.len();
    check_len(n, "bulk_async_execute")?;
    let desc = launch.resolve(executor.num_workers());
    let reverse = desc.placement.is_reverse();
    log_dispatch(BulkMode::Value, n, &desc);

    let call = Arc::new(ValueCall {
        executor: executor.clone(),
        items,
        f: Arc::new(f),
        results: (0..n).map(|_| OnceLock::new()).collect(),
        latch: Latch::new(n),
    });

    for plan in desc.plan(n, BulkMode::Value) {
        trace!(
            context = plan.context,
            worker = plan.worker,
            len = plan.partition.len,
            dispatch = ?plan.dispatch,
            "bulk partition"
        );
        match plan.dispatch {
            Dispatch::Empty => {}
            Dispatch::Inline | Dispatch::InlineDirect => {
                call.submit_partition(plan.worker, plan.partition, reverse);
            }
            Dispatch::Spawner => {
                let c = Arc::clone(&call);
                let (worker, part) = (plan.worker, plan.partition);
                let job: Job = Box::new(move || c.submit_partition(worker, part, reverse));
                if let Err(job) = executor.post(spawner_hint(worker), job) {
                    // Leaves submitted from here fail as rejected in their slots.
                    job();
                }
            }
        }
    }

    call.latch.wait();

    Ok(call
        .results
        .iter()
        .map(|slot| {
            slot.get()
                .map_or_else(|| TaskFuture::failed(TaskError::broken_promise()), TaskFuture::share)
        })
        .collect())
}

/// Value mode: `f(&shape[i])` as its own task, one future per item, in
/// shape order.
///
/// Returns once every item has been submitted, not once they finished.
///
/// # Errors
///
/// `ErrorKind::BadParameter` if the shape exceeds
/// [`MAX_BULK_ITEMS`](super::partition::MAX_BULK_ITEMS). Item failures are
/// never reported here, only through the item's future.
pub fn bulk_async_execute<E, I, R, F>(
    executor: &E,
    launch: &BulkLaunch,
    f: F,
    shape: &[I],
) -> Result<Vec<TaskFuture<R>>>
where
    E: Executor,
    I: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&I) -> R + Send + Sync + 'static,
{
    check_len(shape.len(), "bulk_async_execute")?;
    run_value(executor, launch, f, Arc::from(shape))
}

// ============================================================================
// Void mode
// ============================================================================

struct VoidCall<E, I, F> {
    executor: E,
    items: Arc<[I]>,
    f: F,
    latch: Latch,
    errors: ExceptionSlot,
    reverse: bool,
}

impl<E, I, F> VoidCall<E, I, F>
where
    E: Executor,
    I: Send + Sync + 'static,
    F: Fn(&I) + Send + Sync + 'static,
{
    /// Run item `i`; success or failure, the latch is counted down.
    fn invoke(&self, i: usize) {
        if let Err(e) = error::catch("bulk_post", || (self.f)(&self.items[i])) {
            if self.errors.record(e) {
                debug!(index = i, "bulk item failed, first error recorded");
            }
        }
        self.latch.count_down(1);
    }

    fn post_item(self: &Arc<Self>, worker: usize, i: usize) {
        let c = Arc::clone(self);
        let job: Job = Box::new(move || c.invoke(i));
        if self.executor.post(ScheduleHint::worker(worker), job).is_err() {
            self.errors.record(TaskError::rejected("bulk_post"));
            self.latch.count_down(1);
        }
    }

    /// Post the partition's indices in placement order. With `direct`, the
    /// index at the far end is held back and run here after the others are
    /// posted.
    fn launch(self: &Arc<Self>, worker: usize, queue: &IndexQueue, direct: bool) {
        let reserved = match (direct, self.reverse) {
            (false, _) => None,
            (true, false) => queue.pop_right(),
            (true, true) => queue.pop_left(),
        };

        loop {
            let next = if self.reverse {
                queue.pop_right()
            } else {
                queue.pop_left()
            };
            match next {
                Some(i) => self.post_item(worker, i),
                None => break,
            }
        }

        if let Some(i) = reserved {
            self.invoke(i);
        }
    }
}

fn run_void<E, I, F>(executor: &E, launch: &BulkLaunch, f: F, items: Arc<[I]>) -> Result<()>
where
    E: Executor,
    I: Send + Sync + 'static,
    F: Fn(&I) + Send + Sync + 'static,
{
    let n = items.len();
    check_len(n, "bulk_post")?;
    let desc = launch.resolve(executor.num_workers());
    log_dispatch(BulkMode::Void, n, &desc);

    let call = Arc::new(VoidCall {
        executor: executor.clone(),
        items,
        f,
        latch: Latch::new(n),
        errors: ExceptionSlot::new(),
        reverse: desc.placement.is_reverse(),
    });

    for plan in desc.plan(n, BulkMode::Void) {
        trace!(
            context = plan.context,
            worker = plan.worker,
            len = plan.partition.len,
            dispatch = ?plan.dispatch,
            "bulk partition"
        );
        if plan.dispatch == Dispatch::Empty {
            continue;
        }
        let queue = plan.partition.queue()?;
        match plan.dispatch {
            Dispatch::Empty => {}
            Dispatch::Inline => call.launch(plan.worker, &queue, false),
            Dispatch::InlineDirect => call.launch(plan.worker, &queue, true),
            Dispatch::Spawner => {
                let c = Arc::clone(&call);
                let worker = plan.worker;
                let job: Job = Box::new(move || c.launch(worker, &queue, true));
                if let Err(job) = executor.post(spawner_hint(worker), job) {
                    job();
                }
            }
        }
    }

    call.latch.wait();

    match call.errors.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Void mode, blocking: run `f` over every item and return the first
/// failure once all of them have finished.
pub fn bulk_sync_execute<E, I, F>(executor: &E, launch: &BulkLaunch, f: F, shape: &[I]) -> Result<()>
where
    E: Executor,
    I: Clone + Send + Sync + 'static,
    F: Fn(&I) + Send + Sync + 'static,
{
    check_len(shape.len(), "bulk_post")?;
    run_void(executor, launch, f, Arc::from(shape))
}

/// Void mode as a single asynchronous unit on `executor`.
pub fn bulk_post<E, I, F>(executor: &E, launch: &BulkLaunch, f: F, shape: &[I]) -> TaskFuture<()>
where
    E: Executor,
    I: Clone + Send + Sync + 'static,
    F: Fn(&I) + Send + Sync + 'static,
{
    if let Err(e) = check_len(shape.len(), "bulk_post") {
        return TaskFuture::failed(e);
    }
    let items: Arc<[I]> = Arc::from(shape);
    let exec = executor.clone();
    let launch = *launch;
    executor.async_try_execute(ScheduleHint::NONE, move || run_void(&exec, &launch, f, items))
}

// ============================================================================
// Bulk-then
// ============================================================================

/// Once `predecessor` is ready, run `f(&shape[i], &value)` over the shape in
/// value mode and collect every result in shape order.
///
/// Fails with the predecessor's error, or with the first failing item (in
/// shape order) after all items have finished.
pub fn bulk_then_execute<E, I, P, R, F>(
    executor: &E,
    launch: &BulkLaunch,
    f: F,
    shape: &[I],
    predecessor: TaskFuture<P>,
) -> TaskFuture<Vec<R>>
where
    E: Executor,
    I: Clone + Send + Sync + 'static,
    P: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&I, &P) -> R + Send + Sync + 'static,
{
    if let Err(e) = check_len(shape.len(), "bulk_then_execute") {
        return TaskFuture::failed(e);
    }
    let items: Arc<[I]> = Arc::from(shape);
    let exec = executor.clone();
    let launch = *launch;

    predecessor.then_try(executor, move |value| {
        let value = Arc::new(value?);
        let futures = run_value(&exec, &launch, move |item: &I| f(item, &value), items)?;

        let mut out = Vec::with_capacity(futures.len());
        let mut first = None;
        for fut in futures {
            match fut.get() {
                Ok(v) => out.push(v),
                Err(e) => {
                    first.get_or_insert(e);
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(out),
        }
    })
}
