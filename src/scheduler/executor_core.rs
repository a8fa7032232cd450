//! Pool policy and state helpers shared by the worker loop and helping waits.
//!
//! The worker loop and a worker blocked in [`help_until`](super::executor::help_until)
//! pop jobs with the same [`pop_task`] order and account for them with the
//! same combined-state arithmetic, so a job executed while helping is
//! indistinguishable from one executed by the main loop. Helpers nested past
//! [`UNRESTRICTED_HELP_DEPTH`](super::executor::UNRESTRICTED_HELP_DEPTH)
//! switch to [`pop_nested_task`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use super::executor::ExecutorConfig;

/// LSB in the combined state: 1 when accepting external posts.
pub(crate) const ACCEPTING_BIT: usize = 1;
/// Count unit for the combined state (count stored in bits 1+).
pub(crate) const COUNT_UNIT: usize = 2;

/// Local pushes before a sibling is woken to come steal.
///
/// A bulk spawner pushes its whole partition onto its own deque in a tight
/// loop; without this, siblings stay parked until their timeout expires.
pub(crate) const WAKE_ON_HOARD_THRESHOLD: u32 = 32;

/// Queue a popped job came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PopSource {
    Local,
    Mailbox,
    Injector,
    Steal,
}

/// Job sources visible to one worker.
///
/// Implementations must keep `pop_local` LIFO and `steal_from_victim` FIFO,
/// and must never hand out the same job twice.
pub(crate) trait TaskSource<T> {
    fn worker_id(&self) -> usize;
    fn worker_count(&self) -> usize;

    fn pop_local(&mut self) -> Option<T>;
    /// Jobs posted to this worker by placement hint.
    fn pop_mailbox(&mut self) -> Option<T>;
    fn steal_from_injector(&mut self) -> Option<T>;
    /// Take one job from the injector without refilling the local deque.
    fn steal_single_from_injector(&mut self) -> Option<T> {
        self.steal_from_injector()
    }
    /// Steal from `victim`'s deque, falling back to its mailbox.
    fn steal_from_victim(&mut self, victim: usize) -> Option<T>;

    fn rng_next_usize(&mut self, upper: usize) -> usize;

    fn record_pop(&mut self, _source: PopSource) {}
    fn record_steal_attempt(&mut self) {}
}

#[inline(always)]
pub(crate) fn in_flight(state: usize) -> usize {
    state >> 1
}

#[inline(always)]
pub(crate) fn is_accepting(state: usize) -> bool {
    (state & ACCEPTING_BIT) != 0
}

/// Clear the accepting bit and return the previous state word.
#[inline(always)]
pub(crate) fn close_gate(state: &AtomicUsize) -> usize {
    state.fetch_and(!ACCEPTING_BIT, Ordering::AcqRel)
}

/// Unconditional increment. Only valid while some job is in flight on the
/// calling thread (the pool cannot finish underneath it).
#[inline(always)]
pub(crate) fn increment_count(state: &AtomicUsize) -> usize {
    state.fetch_add(COUNT_UNIT, Ordering::AcqRel)
}

/// Increment only if the gate is open. Used by external producers.
#[inline]
pub(crate) fn try_increment_if_accepting(state: &AtomicUsize) -> bool {
    let mut s = state.load(Ordering::Acquire);
    loop {
        if !is_accepting(s) {
            return false;
        }
        match state.compare_exchange_weak(
            s,
            s.wrapping_add(COUNT_UNIT),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(actual) => s = actual,
        }
    }
}

/// Decrement after a job finished. Returns `true` when this was the last
/// in-flight job of a closed pool, i.e. the caller must signal shutdown.
#[inline(always)]
pub(crate) fn complete_one(state: &AtomicUsize) -> bool {
    let prev = state.fetch_sub(COUNT_UNIT, Ordering::AcqRel);
    debug_assert!(in_flight(prev) > 0, "in_flight underflow");
    in_flight(prev) == 1 && !is_accepting(prev)
}

/// Try to pop a job: local, own mailbox, injector, then random victims.
///
/// Own mailbox before the injector keeps placement hints meaningful: work
/// aimed at this worker is preferred over anonymous work. Victims are drawn
/// uniformly from the other `n - 1` workers.
#[inline]
pub(crate) fn pop_task<T, C>(steal_tries: u32, ctx: &mut C) -> Option<(T, PopSource)>
where
    C: TaskSource<T>,
{
    if let Some(t) = ctx.pop_local() {
        ctx.record_pop(PopSource::Local);
        return Some((t, PopSource::Local));
    }

    if let Some(t) = ctx.pop_mailbox() {
        ctx.record_pop(PopSource::Mailbox);
        return Some((t, PopSource::Mailbox));
    }

    if let Some(t) = ctx.steal_from_injector() {
        ctx.record_pop(PopSource::Injector);
        return Some((t, PopSource::Injector));
    }

    steal_from_victims(steal_tries, ctx)
}

/// Pop order for a helper that may only run nested work: local, own
/// mailbox, victims, then a single injector job. Never batch-steals.
#[inline]
pub(crate) fn pop_nested_task<T, C>(steal_tries: u32, ctx: &mut C) -> Option<(T, PopSource)>
where
    C: TaskSource<T>,
{
    if let Some(t) = ctx.pop_local() {
        ctx.record_pop(PopSource::Local);
        return Some((t, PopSource::Local));
    }

    if let Some(t) = ctx.pop_mailbox() {
        ctx.record_pop(PopSource::Mailbox);
        return Some((t, PopSource::Mailbox));
    }

    if let Some(found) = steal_from_victims(steal_tries, ctx) {
        return Some(found);
    }

    let t = ctx.steal_single_from_injector()?;
    ctx.record_pop(PopSource::Injector);
    Some((t, PopSource::Injector))
}

fn steal_from_victims<T, C>(steal_tries: u32, ctx: &mut C) -> Option<(T, PopSource)>
where
    C: TaskSource<T>,
{
    let n = ctx.worker_count();
    if n <= 1 {
        return None;
    }

    for _ in 0..steal_tries {
        // [0, n-1) -> [0, n) \ {self}
        let mut victim = ctx.rng_next_usize(n - 1);
        if victim >= ctx.worker_id() {
            victim += 1;
        }

        if let Some(t) = ctx.steal_from_victim(victim) {
            ctx.record_pop(PopSource::Steal);
            return Some((t, PopSource::Steal));
        }

        ctx.record_steal_attempt();
    }

    None
}

pub(crate) enum IdleAction {
    Continue,
    Park { timeout: Duration },
}

/// Spin, then yield every 16th round, then park with timeout.
pub(crate) struct TieredIdle {
    idle_rounds: u32,
}

impl TieredIdle {
    pub(crate) fn new() -> Self {
        Self { idle_rounds: 0 }
    }

    pub(crate) fn on_work(&mut self) {
        self.idle_rounds = 0;
    }

    pub(crate) fn on_idle(&mut self, cfg: &ExecutorConfig) -> IdleAction {
        self.idle_rounds = self.idle_rounds.saturating_add(1);

        if self.idle_rounds <= cfg.spin_iters {
            std::hint::spin_loop();
            return IdleAction::Continue;
        }

        if (self.idle_rounds & 0xF) == 0 {
            thread::yield_now();
        }

        IdleAction::Park {
            timeout: cfg.park_timeout,
        }
    }
}
