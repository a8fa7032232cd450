//! Scan partitioner: map → sequential fold → re-map → reduce.
//!
//! ```text
//!   chunk_shape ─► f1 over chunks (bulk) ─► wait_all
//!                                              │ any failed? ──► Failed
//!                                              ▼
//!                        f2 fold on the caller: prefix[0] = init,
//!                        prefix[i] = f2(&prefix[i-1], phase1[i-1])
//!                                              │
//!                                              ▼
//!                  f3(chunk i, &prefix[i]) over chunks (bulk) ─► drain
//!                                              │
//!                                              ▼
//!                              f4(prefixes, phase-3 results) ─► R
//! ```
//!
//! The fold is the only ordered step. Phase short-circuits are explicit
//! [`ScanPhase`] transitions: a failed phase 1 skips phases 2 and 3, a
//! failed phase 3 is reported after every phase-3 item has finished.
//!
//! [`scan_static`] blocks; [`scan_task`] runs the same steps as one task on
//! the policy's executor; [`scan_partitioner`] picks one by
//! [`LaunchMode`].

use std::sync::Arc;

use tracing::{debug, trace};

use crate::bulk::partition::BulkLaunch;
use crate::error::{self, Result, TaskError};
use crate::exec::Executor;
use crate::future::{wait_all, TaskFuture};
use crate::policy::{ExecutionPolicy, LaunchMode};
use crate::shape::{chunk_shape, Chunk};
use crate::sync::ExceptionSlot;

/// Progress of one scan call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Init,
    Phase1Running,
    Phase1Done,
    Phase2Folding,
    Phase3Running,
    Reducing,
    Completed,
    Failed,
}

impl ScanPhase {
    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: ScanPhase) -> bool {
        use ScanPhase::*;
        matches!(
            (self, next),
            (Init, Phase1Running)
                | (Phase1Running, Phase1Done)
                | (Phase1Done, Phase2Folding)
                | (Phase2Folding, Phase3Running)
                | (Phase3Running, Reducing)
                | (Reducing, Completed)
                | (Init | Phase1Running | Phase1Done | Phase2Folding | Phase3Running | Reducing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Completed | ScanPhase::Failed)
    }
}

struct ScanRun {
    phase: ScanPhase,
}

impl ScanRun {
    fn new() -> Self {
        Self {
            phase: ScanPhase::Init,
        }
    }

    fn advance(&mut self, next: ScanPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal scan transition {:?} -> {:?}",
            self.phase,
            next
        );
        trace!(from = ?self.phase, to = ?next, "scan phase");
        self.phase = next;
    }

    fn fail(&mut self, err: TaskError) -> TaskError {
        debug!(phase = ?self.phase, error = %err, "scan failed");
        self.advance(ScanPhase::Failed);
        err
    }
}

/// Blocking scan over `[first, first+count)`, chunked per the policy.
///
/// `f1` maps each chunk, `f2` folds the phase-1 results into per-chunk
/// exclusive prefixes starting at `init`, `f3` maps each chunk with its
/// prefix, `f4` packages `(prefixes, phase-3 results)`.
///
/// # Errors
///
/// The first error recorded across all phases. Nothing is still running on
/// the executor for this call when it returns.
#[allow(clippy::too_many_arguments)]
pub fn scan_static<E, R1, R2, R, F1, F2, F3, F4>(
    policy: &ExecutionPolicy<E>,
    first: usize,
    count: usize,
    init: R1,
    f1: F1,
    f2: F2,
    f3: F3,
    f4: F4,
) -> Result<R>
where
    E: Executor,
    R1: Clone + Send + Sync + 'static,
    R2: Send + 'static,
    F1: Fn(Chunk) -> R1 + Send + Sync + 'static,
    F2: Fn(&R1, R1) -> R1,
    F3: Fn(Chunk, &R1) -> R2 + Send + Sync + 'static,
    F4: FnOnce(Vec<R1>, Vec<R2>) -> R,
{
    let mut run = ScanRun::new();
    let executor = policy.executor();
    let launch = BulkLaunch::from_policy(policy);
    let shape = chunk_shape(policy.params(), executor.num_workers(), first, count);
    let m = shape.len();
    debug!(first, count, chunks = m, "scan start");

    // Phase 1: f1 over every chunk.
    run.advance(ScanPhase::Phase1Running);
    let phase1 = match executor.bulk_async_execute(&launch, move |c: &Chunk| f1(*c), &shape[..]) {
        Ok(futures) => futures,
        Err(e) => return Err(run.fail(e)),
    };
    let phase1_failed = wait_all(&phase1);
    run.advance(ScanPhase::Phase1Done);

    let errors = ExceptionSlot::new();
    let mut phase1_values = Vec::with_capacity(m);
    for fut in phase1 {
        match fut.get() {
            Ok(v) => phase1_values.push(v),
            Err(e) => {
                errors.record(e);
            }
        }
    }
    if phase1_failed {
        let err = errors
            .take()
            .unwrap_or_else(|| TaskError::broken_promise().with_function("scan_partitioner"));
        return Err(run.fail(err));
    }

    // Phase 2: sequential exclusive fold on this context.
    run.advance(ScanPhase::Phase2Folding);
    let folded = error::catch("scan_partitioner", || {
        let mut prefixes = Vec::with_capacity(m);
        if m > 0 {
            prefixes.push(init);
            for v in phase1_values.into_iter().take(m - 1) {
                let next = f2(&prefixes[prefixes.len() - 1], v);
                prefixes.push(next);
            }
        }
        prefixes
    });
    let prefixes = match folded {
        Ok(p) => Arc::new(p),
        Err(e) => return Err(run.fail(e)),
    };

    // Phase 3: f3 with each chunk's prefix.
    run.advance(ScanPhase::Phase3Running);
    let indices: Vec<usize> = (0..m).collect();
    let phase3 = {
        let prefixes = Arc::clone(&prefixes);
        let shape = shape.clone();
        executor.bulk_async_execute(&launch, move |&i: &usize| f3(shape[i], &prefixes[i]), &indices)
    };
    let phase3 = match phase3 {
        Ok(futures) => futures,
        Err(e) => return Err(run.fail(e)),
    };

    // Reduce: drain everything before deciding.
    run.advance(ScanPhase::Reducing);
    let mut finals = Vec::with_capacity(m);
    for fut in phase3 {
        match fut.get() {
            Ok(v) => finals.push(v),
            Err(e) => {
                errors.record(e);
            }
        }
    }
    if let Some(e) = errors.take() {
        return Err(run.fail(e));
    }

    // Phase-3 jobs may still hold their clone for a moment after
    // fulfilling their futures.
    let prefixes = Arc::try_unwrap(prefixes).unwrap_or_else(|shared| (*shared).clone());
    match error::catch("scan_partitioner", || f4(prefixes, finals)) {
        Ok(r) => {
            run.advance(ScanPhase::Completed);
            Ok(r)
        }
        Err(e) => Err(run.fail(e)),
    }
}

/// [`scan_static`] as one task on the policy's executor.
#[allow(clippy::too_many_arguments)]
pub fn scan_task<E, R1, R2, R, F1, F2, F3, F4>(
    policy: &ExecutionPolicy<E>,
    first: usize,
    count: usize,
    init: R1,
    f1: F1,
    f2: F2,
    f3: F3,
    f4: F4,
) -> TaskFuture<R>
where
    E: Executor,
    R1: Clone + Send + Sync + 'static,
    R2: Send + 'static,
    R: Send + 'static,
    F1: Fn(Chunk) -> R1 + Send + Sync + 'static,
    F2: Fn(&R1, R1) -> R1 + Send + 'static,
    F3: Fn(Chunk, &R1) -> R2 + Send + Sync + 'static,
    F4: FnOnce(Vec<R1>, Vec<R2>) -> R + Send + 'static,
{
    let inner = policy.clone();
    policy
        .executor()
        .async_try_execute(policy.schedule_hint(), move || {
            scan_static(&inner, first, count, init, f1, f2, f3, f4)
        })
}

/// Static or task scan, chosen by the policy's [`LaunchMode`].
///
/// Always returns a future; for [`LaunchMode::Sync`] it is already ready
/// when this returns.
#[allow(clippy::too_many_arguments)]
pub fn scan_partitioner<E, R1, R2, R, F1, F2, F3, F4>(
    policy: &ExecutionPolicy<E>,
    first: usize,
    count: usize,
    init: R1,
    f1: F1,
    f2: F2,
    f3: F3,
    f4: F4,
) -> TaskFuture<R>
where
    E: Executor,
    R1: Clone + Send + Sync + 'static,
    R2: Send + 'static,
    R: Send + 'static,
    F1: Fn(Chunk) -> R1 + Send + Sync + 'static,
    F2: Fn(&R1, R1) -> R1 + Send + 'static,
    F3: Fn(Chunk, &R1) -> R2 + Send + Sync + 'static,
    F4: FnOnce(Vec<R1>, Vec<R2>) -> R + Send + 'static,
{
    match policy.launch() {
        LaunchMode::Sync => match scan_static(policy, first, count, init, f1, f2, f3, f4) {
            Ok(r) => TaskFuture::ready(r),
            Err(e) => TaskFuture::failed(e),
        },
        LaunchMode::Async => scan_task(policy, first, count, init, f1, f2, f3, f4),
    }
}
