//! Thread-local identity of the pool worker running on this thread.
//!
//! # Purpose
//!
//! - `post()` checks it to push onto the caller's own deque instead of the
//!   global injector when a job is submitted from inside the same pool.
//! - Blocking waits check it to decide between helping (run queued jobs) and
//!   parking on a condition variable.
//! - Error diagnostics record which worker raised a failure.
//!
//! Identity is `(pool, worker)`: a worker of pool A submitting to pool B is an
//! external producer as far as B is concerned.
//!
//! # Correctness Invariant
//!
//! `current_worker()` returns `Some` **only** on live pool worker threads.
//! Workers set it at startup and clear it before exit.

use std::cell::Cell;

/// Sentinel value indicating no identity is set.
const NO_WORKER: (usize, usize) = (usize::MAX, usize::MAX);

thread_local! {
    static WORKER: Cell<(usize, usize)> = const { Cell::new(NO_WORKER) };
}

/// Set `(pool_id, worker_id)` for this thread, or clear it with `None`.
#[inline]
pub(crate) fn set_current_worker(id: Option<(usize, usize)>) {
    WORKER.with(|c| c.set(id.unwrap_or(NO_WORKER)));
}

/// `(pool_id, worker_id)` of this thread, if it is a pool worker.
#[inline]
pub(crate) fn current_worker() -> Option<(usize, usize)> {
    WORKER.with(|c| {
        let v = c.get();
        if v == NO_WORKER {
            None
        } else {
            Some(v)
        }
    })
}

/// Worker index of this thread within its pool, if any.
#[inline]
pub fn current_worker_id() -> Option<usize> {
    current_worker().map(|(_, w)| w)
}

/// Worker index of this thread if it belongs to pool `pool_id`.
#[inline]
pub(crate) fn worker_of(pool_id: usize) -> Option<usize> {
    match current_worker() {
        Some((p, w)) if p == pool_id => Some(w),
        _ => None,
    }
}
