//! Completion barrier: a one-shot countdown that releases its waiter at zero.
//!
//! Counting down is a single atomic RMW on a padded counter. Only the
//! decrement that reaches zero takes the lock, to publish the release to a
//! waiter blocked on the condition variable.
//!
//! `wait()` called on a pool worker never blocks the worker: it keeps
//! running queued jobs until the count reaches zero (see
//! [`help_until`](crate::scheduler::help_until)). The jobs that count this
//! latch down may well be queued behind the waiter on the same worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_utils::CachePadded;

use crate::scheduler::help_until;

pub struct Latch {
    remaining: CachePadded<AtomicUsize>,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Latch {
    /// Latch expecting `count` completions. `count == 0` is already released.
    pub fn new(count: usize) -> Self {
        Self {
            remaining: CachePadded::new(AtomicUsize::new(count)),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Record `k` completions.
    ///
    /// Callers must never count down more than the initial count in total.
    pub fn count_down(&self, k: usize) {
        if k == 0 {
            return;
        }
        let prev = self.remaining.fetch_sub(k, Ordering::AcqRel);
        debug_assert!(prev >= k, "latch counted down past zero");
        if prev == k {
            let _guard = self.lock.lock().expect("latch mutex poisoned");
            self.cond.notify_all();
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Completions still outstanding.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        if self.is_ready() {
            return;
        }
        if help_until(&|| self.is_ready()) {
            return;
        }
        let mut guard = self.lock.lock().expect("latch mutex poisoned");
        while !self.is_ready() {
            guard = self.cond.wait(guard).expect("latch mutex poisoned");
        }
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch")
            .field("remaining", &self.remaining())
            .finish()
    }
}
