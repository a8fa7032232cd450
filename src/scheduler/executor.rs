//! Work-Stealing Thread Pool
//!
//! # Architecture
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────────┐
//!                    │                       ThreadPool                          │
//!                    │                                                           │
//!  External ─────────┼──► Injector ─────────┬────────────────────────────────────┤
//!  producers         │    (no hint)         │                                    │
//!       │            │                      ▼                                    │
//!       │  hinted    │     ┌─────────────────────────────────────────────────┐   │
//!       └────────────┼──►  │  Worker 0     │  Worker 1     │  Worker N       │   │
//!                    │     │  ┌─────────┐  │  ┌─────────┐  │  ┌─────────┐    │   │
//!                    │     │  │ Mailbox │  │  │ Mailbox │  │  │ Mailbox │    │   │
//!                    │     │  ├─────────┤  │  ├─────────┤  │  ├─────────┤    │   │
//!                    │     │  │ Deque   │◄─┼─►│ Deque   │◄─┼─►│ Deque   │    │   │
//!                    │     │  │ (LIFO)  │  │  │ (LIFO)  │  │  │ (LIFO)  │    │   │
//!                    │     │  └─────────┘  │  └─────────┘  │  └─────────┘    │   │
//!                    │     │  WorkerSlot (thread-local: deque, rng, metrics)  │   │
//!                    │     └─────────────────────────────────────────────────┘   │
//!                    │          Shared: state, done, unparkers, panic            │
//!                    └───────────────────────────────────────────────────────────┘
//! ```
//!
//! - N worker threads (optionally pinned to cores)
//! - Per-worker Chase-Lev deque (LIFO local, FIFO steal)
//! - Per-worker mailbox for jobs posted with a worker hint
//! - Global injector for un-hinted external jobs
//! - Tiered idle strategy: spin → yield → park
//!
//! Jobs are type-erased closures ([`Job`]). A job that posts more jobs from
//! a worker of the same pool goes to that worker's own deque (or the hinted
//! worker's mailbox) without touching the gate.
//!
//! # Correctness Invariants
//!
//! - **Work-conserving**: once posted, a job will execute
//! - **Termination detection**: `in_flight` counter tracks live jobs
//! - **Panic isolation**: a panicking job does not stop the pool; the first
//!   panic is re-raised by [`ThreadPool::join`]
//! - **No lost wakeups**: Parker/Unparker pattern
//!
//! # Blocking inside jobs
//!
//! [`help_until`] lets a job that must wait (for a latch or a future) keep
//! executing queued jobs instead of blocking its worker. Bulk operations
//! rely on this: a void-mode bulk call is itself a job that waits for the
//! jobs it posted, which would deadlock a single-worker pool otherwise.
//!
//! A helped job may wait and help in turn. Every queued job carries a
//! nesting level (0 for external posts, one more than the posting job for
//! posts from a worker), and a thread nested deeper than
//! [`UNRESTRICTED_HELP_DEPTH`] helping frames only runs jobs with a higher
//! level than the job it waits in. Shallower jobs it pops are handed back
//! through the injector.
//!
//! ```text
//!   depth 1..=8        any job            (stack grows by sibling jobs)
//!   depth > 8          level > own level  (stack grows only along nesting)
//! ```
//!
//! A restricted helper that finds nothing it may run for [`STARVED_PARKS`]
//! parks in a row runs the next shallower job anyway, so waits on work that
//! is not nested below the waiter (a `then` continuation posted by an
//! unrelated job) still finish on a pool whose workers are all restricted.

use super::executor_core::{
    close_gate, in_flight, increment_count, is_accepting, pop_nested_task, pop_task,
    try_increment_if_accepting, complete_one, IdleAction, PopSource, TaskSource, TieredIdle, ACCEPTING_BIT,
    WAKE_ON_HOARD_THRESHOLD,
};
use super::metrics::{MetricsSnapshot, WorkerMetricsLocal};
use super::rng::{worker_streams, XorShift64};
use super::worker_id;
use crate::error::{ErrorKind, Result, TaskError};
use crate::policy::{ScheduleHint, StackSize};
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::CachePadded;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Unit of work accepted by the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Helping frames per thread that may run any queued job.
pub const UNRESTRICTED_HELP_DEPTH: u32 = 8;

/// Consecutive parks after which a restricted helper runs a shallower job.
pub const STARVED_PARKS: u32 = 1024;

/// A queued job and its nesting level.
struct Task {
    job: Job,
    level: u32,
}

/// Pool ids, so a worker of one pool posting to another is treated as external.
static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Configuration
// ============================================================================

/// Pool configuration.
///
/// # Measurement Required Before Tuning
///
/// | Knob         | Workload Sensitivity                    |
/// |--------------|-----------------------------------------|
/// | workers      | CPU count, task CPU-boundedness         |
/// | steal_tries  | Bulk fanout pattern, worker count       |
/// | spin_iters   | Task latency distribution               |
/// | park_timeout | External post frequency                 |
#[derive(Clone, Copy, Debug)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Seed for victim selection. Same seed + single worker = same order.
    pub seed: u64,

    /// Steal attempts before giving up per idle cycle.
    pub steal_tries: u32,

    /// Spin iterations before yielding/parking.
    pub spin_iters: u32,

    /// Park timeout after spinning/yielding.
    ///
    /// Also bounds how late a helping waiter notices a condition completed
    /// by a thread that does not unpark it.
    pub park_timeout: Duration,

    /// Try to pin each worker to a core (requires `affinity` feature).
    pub pin_threads: bool,
}

impl ExecutorConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
        assert!(self.steal_tries > 0, "steal_tries must be > 0");
        assert!(self.spin_iters > 0, "spin_iters must be > 0");
        assert!(
            self.park_timeout > Duration::ZERO,
            "park_timeout must be > 0"
        );
    }

    /// Defaults sized to the machine, overridden by `FANOUT_WORKERS` and
    /// `FANOUT_SEED` (decimal or `0x` hex).
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self {
            workers: num_cpus::get().max(1),
            ..Self::default()
        };

        if let Ok(v) = std::env::var("FANOUT_WORKERS") {
            cfg.workers = v.trim().parse::<usize>().ok().filter(|&n| n > 0).ok_or_else(|| {
                TaskError::new(
                    ErrorKind::BadParameter,
                    format!("FANOUT_WORKERS must be a positive integer, got {v:?}"),
                )
                .with_function("ExecutorConfig::from_env")
            })?;
        }

        if let Ok(v) = std::env::var("FANOUT_SEED") {
            cfg.seed = parse_seed(&v).ok_or_else(|| {
                TaskError::new(
                    ErrorKind::BadParameter,
                    format!("FANOUT_SEED must be a u64, got {v:?}"),
                )
                .with_function("ExecutorConfig::from_env")
            })?;
        }

        debug!(workers = cfg.workers, seed = cfg.seed, "executor config from env");
        Ok(cfg)
    }
}

fn parse_seed(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            seed: 0x853c49e6748fea9b,
            steal_tries: 4,
            spin_iters: 200,
            park_timeout: Duration::from_micros(200),
            pin_threads: false,
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// State shared by all workers, handles and the pool owner.
///
/// # Invariants
///
/// - `stealers.len() == mailboxes.len() == unparkers.len() == cfg.workers`
/// - `state` is `(in_flight << 1) | accepting` (see [`ACCEPTING_BIT`])
/// - `done` is monotonic: once true, never cleared
/// - `panic` keeps only the first escaped panic
struct Shared {
    id: usize,
    cfg: ExecutorConfig,

    /// Un-hinted external jobs and jobs handed back by restricted helpers.
    /// Workers batch-steal from it.
    injector: Injector<Task>,
    /// Hinted jobs, one queue per worker. Siblings may steal from them.
    mailboxes: Vec<CachePadded<Injector<Task>>>,
    stealers: Vec<Stealer<Task>>,

    state: AtomicUsize,
    done: AtomicBool,

    unparkers: Vec<Unparker>,
    next_unpark: AtomicUsize,

    panic: Mutex<Option<Box<dyn Any + Send + 'static>>>,

    external_posts: AtomicU64,
    small_stack_posts: AtomicU64,
}

impl Shared {
    fn unpark_one(&self) {
        let n = self.unparkers.len();
        if n == 0 {
            return;
        }
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % n;
        self.unparkers[idx].unpark();
    }

    fn unpark_all(&self) {
        for u in &self.unparkers {
            u.unpark();
        }
    }

    fn initiate_done(&self) {
        self.done.store(true, Ordering::Release);
        self.unpark_all();
    }

    /// Keep the first panic. The pool keeps running: other jobs may be
    /// waiting on work that is still queued.
    fn record_panic(&self, p: Box<dyn Any + Send + 'static>) {
        let mut guard = self.panic.lock().expect("panic mutex poisoned");
        if guard.is_none() {
            *guard = Some(p);
        }
    }

    /// Hand a job back to the injector and wake some other worker for it.
    /// The job stays in flight.
    fn defer(&self, from: usize, task: Task) {
        self.injector.push(task);
        let n = self.unparkers.len();
        if n > 1 {
            let skip = 1 + self.next_unpark.fetch_add(1, Ordering::Relaxed) % (n - 1);
            self.unparkers[(from + skip) % n].unpark();
        }
    }

    #[inline]
    fn target(&self, hint: ScheduleHint) -> Option<usize> {
        hint.worker.map(|w| w % self.cfg.workers)
    }

    #[inline]
    fn note_hint(&self, hint: ScheduleHint) {
        if hint.stack == StackSize::Small {
            self.small_stack_posts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Post from a thread that is not a worker of this pool.
    fn post_external(&self, hint: ScheduleHint, job: Job) -> std::result::Result<(), Job> {
        if !try_increment_if_accepting(&self.state) {
            return Err(job);
        }
        self.note_hint(hint);
        self.external_posts.fetch_add(1, Ordering::Relaxed);

        let task = Task { job, level: 0 };
        match self.target(hint) {
            Some(t) => {
                self.mailboxes[t].push(task);
                self.unparkers[t].unpark();
            }
            None => {
                self.injector.push(task);
                self.unpark_one();
            }
        }
        Ok(())
    }
}

// ============================================================================
// WorkerSlot (thread-local per-worker state)
// ============================================================================

/// Per-worker state, owned by the worker's thread-local slot.
///
/// Only borrowed for queue operations, never across a job's execution, so
/// a running job can post or help without re-entrancy conflicts.
struct WorkerSlot {
    worker_id: usize,
    local: Worker<Task>,
    parker: Parker,
    shared: Arc<Shared>,
    rng: XorShift64,
    metrics: WorkerMetricsLocal,
    local_spawns_since_wake: u32,
}

thread_local! {
    static CURRENT: RefCell<Option<WorkerSlot>> = const { RefCell::new(None) };
    /// Level of the job running on this thread.
    static LEVEL: Cell<u32> = const { Cell::new(0) };
    /// Live `help_until` frames on this thread.
    static HELP_DEPTH: Cell<u32> = const { Cell::new(0) };
}

impl WorkerSlot {
    fn push_local(&mut self, job: Task) {
        // Workers only run while a job is in flight, so the pool cannot
        // finish underneath this increment.
        increment_count(&self.shared.state);
        self.metrics.tasks_enqueued = self.metrics.tasks_enqueued.saturating_add(1);
        self.local.push(job);

        // Wake-on-hoard: a spawner pushing its partition would otherwise
        // keep siblings parked until their timeout.
        self.local_spawns_since_wake += 1;
        if self.local_spawns_since_wake >= WAKE_ON_HOARD_THRESHOLD {
            self.local_spawns_since_wake = 0;
            self.shared.unpark_one();
        }
    }

    fn push_mailbox(&mut self, target: usize, job: Task) {
        increment_count(&self.shared.state);
        self.metrics.tasks_enqueued = self.metrics.tasks_enqueued.saturating_add(1);
        self.shared.mailboxes[target].push(job);
        self.shared.unparkers[target].unpark();
    }
}

#[inline]
fn steal_one(s: Steal<Task>) -> Option<Task> {
    match s {
        Steal::Success(j) => Some(j),
        Steal::Retry | Steal::Empty => None,
    }
}

impl TaskSource<Task> for WorkerSlot {
    fn worker_id(&self) -> usize {
        self.worker_id
    }

    fn worker_count(&self) -> usize {
        self.shared.stealers.len()
    }

    fn pop_local(&mut self) -> Option<Task> {
        self.local.pop()
    }

    fn pop_mailbox(&mut self) -> Option<Task> {
        steal_one(self.shared.mailboxes[self.worker_id].steal())
    }

    fn steal_from_injector(&mut self) -> Option<Task> {
        steal_one(self.shared.injector.steal_batch_and_pop(&self.local))
    }

    fn steal_single_from_injector(&mut self) -> Option<Task> {
        steal_one(self.shared.injector.steal())
    }

    fn steal_from_victim(&mut self, victim: usize) -> Option<Task> {
        steal_one(self.shared.stealers[victim].steal())
            .or_else(|| steal_one(self.shared.mailboxes[victim].steal()))
    }

    fn rng_next_usize(&mut self, upper: usize) -> usize {
        self.rng.next_usize(upper)
    }

    fn record_pop(&mut self, source: PopSource) {
        let m = &mut self.metrics;
        match source {
            PopSource::Local => m.local_pops = m.local_pops.saturating_add(1),
            PopSource::Mailbox => m.mailbox_pops = m.mailbox_pops.saturating_add(1),
            PopSource::Injector => m.injector_pops = m.injector_pops.saturating_add(1),
            PopSource::Steal => m.steal_successes = m.steal_successes.saturating_add(1),
        }
    }

    fn record_steal_attempt(&mut self) {
        self.metrics.steal_attempts = self.metrics.steal_attempts.saturating_add(1);
    }
}

/// Borrow this thread's slot if it belongs to pool `pool_id`.
#[inline]
fn with_slot<R>(pool_id: usize, f: impl FnOnce(&mut WorkerSlot) -> R) -> Option<R> {
    CURRENT.with(|c| {
        let mut guard = c.borrow_mut();
        match guard.as_mut() {
            Some(slot) if slot.shared.id == pool_id => Some(f(slot)),
            _ => None,
        }
    })
}

/// Run one job outside any slot borrow, then account for it.
fn run_job(shared: &Shared, task: Task, helped: bool) {
    let outer = LEVEL.with(|l| l.replace(task.level));
    let started = Instant::now();
    if let Err(p) = panic::catch_unwind(AssertUnwindSafe(task.job)) {
        warn!(pool = shared.id, "job panicked; re-raised at join");
        shared.record_panic(p);
    }
    let elapsed = started.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    LEVEL.with(|l| l.set(outer));

    with_slot(shared.id, |slot| {
        let m = &mut slot.metrics;
        m.tasks_executed = m.tasks_executed.saturating_add(1);
        if helped {
            m.helped_tasks = m.helped_tasks.saturating_add(1);
        }
        m.task_time_ns.record(elapsed);
    });

    if complete_one(&shared.state) {
        shared.initiate_done();
    }
}

/// One idle round. Returns `true` if the worker parked.
fn idle_round(shared: &Shared, idle: &mut TieredIdle) -> bool {
    match idle.on_idle(&shared.cfg) {
        IdleAction::Continue => false,
        IdleAction::Park { timeout } => {
            with_slot(shared.id, |slot| {
                slot.metrics.park_count = slot.metrics.park_count.saturating_add(1);
                slot.parker.park_timeout(timeout);
            });
            true
        }
    }
}

/// Restores the thread's helping depth when a `help_until` frame exits.
struct HelpFrame {
    outer: u32,
}

impl HelpFrame {
    fn enter() -> Self {
        let outer = HELP_DEPTH.with(|d| d.replace(d.get().saturating_add(1)));
        Self { outer }
    }

    fn depth(&self) -> u32 {
        self.outer + 1
    }
}

impl Drop for HelpFrame {
    fn drop(&mut self) {
        HELP_DEPTH.with(|d| d.set(self.outer));
    }
}

/// Keep executing this pool's jobs until `ready()` holds.
///
/// Returns `false` without doing anything when the calling thread is not a
/// pool worker; the caller must then block by other means.
///
/// Frames nested deeper than [`UNRESTRICTED_HELP_DEPTH`] only run jobs
/// nested below the job they wait in (see the module docs).
pub(crate) fn help_until(ready: &dyn Fn() -> bool) -> bool {
    let (shared, worker) = match CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .map(|s| (Arc::clone(&s.shared), s.worker_id))
    }) {
        Some(found) => found,
        None => return false,
    };

    let frame = HelpFrame::enter();
    let depth = frame.depth();
    with_slot(shared.id, |slot| {
        let m = &mut slot.metrics;
        m.max_help_depth = m.max_help_depth.max(u64::from(depth));
    });
    let floor = (depth > UNRESTRICTED_HELP_DEPTH).then(|| LEVEL.with(Cell::get));

    let mut idle = TieredIdle::new();
    let mut starved_parks = 0u32;
    while !ready() {
        let popped = with_slot(shared.id, |slot| match floor {
            None => pop_task(shared.cfg.steal_tries, slot),
            Some(_) => pop_nested_task(shared.cfg.steal_tries, slot),
        })
        .flatten()
        .map(|(task, _)| task);

        let runnable = match (popped, floor) {
            (Some(task), Some(level)) if task.level <= level && starved_parks < STARVED_PARKS => {
                shared.defer(worker, task);
                None
            }
            (popped, _) => popped,
        };

        match runnable {
            Some(task) => {
                idle.on_work();
                starved_parks = 0;
                run_job(&shared, task, true);
            }
            None => {
                if idle_round(&shared, &mut idle) {
                    starved_parks = starved_parks.saturating_add(1);
                }
            }
        }
    }
    true
}

// ============================================================================
// PoolHandle (the thin seam for producers)
// ============================================================================

/// Cloneable handle for posting jobs to a [`ThreadPool`].
///
/// `Send + Sync`. Multiple producers may post concurrently.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("pool", &self.shared.id)
            .field("workers", &self.shared.cfg.workers)
            .finish()
    }
}

impl PoolHandle {
    /// Post a job.
    ///
    /// # Errors
    ///
    /// Returns `Err(job)` if an external producer posts after `join()`
    /// closed the gate. Posts from this pool's own workers always succeed:
    /// they run inside a live job, so the pool cannot have finished.
    ///
    /// # Placement
    ///
    /// | Caller | Hint | Destination |
    /// |--------|------|-------------|
    /// | own worker `w` | none or `w` | `w`'s deque |
    /// | own worker `w` | `t != w` | `t`'s mailbox |
    /// | external | `t` | `t`'s mailbox |
    /// | external | none | injector |
    #[inline]
    pub fn post(&self, hint: ScheduleHint, job: Job) -> std::result::Result<(), Job> {
        let shared = &self.shared;
        let target = shared.target(hint);

        let mut job = Some(job);
        let posted_locally = with_slot(shared.id, |slot| {
            if let Some(job) = job.take() {
                let job = Task {
                    job,
                    level: LEVEL.with(Cell::get).saturating_add(1),
                };
                match target {
                    Some(t) if t != slot.worker_id => slot.push_mailbox(t, job),
                    _ => slot.push_local(job),
                }
            }
        });

        match (posted_locally, job) {
            (Some(()), _) => {
                shared.note_hint(hint);
                Ok(())
            }
            (None, Some(job)) => shared.post_external(hint, job),
            (None, None) => Ok(()),
        }
    }

    /// Number of worker threads.
    #[inline]
    pub fn workers(&self) -> usize {
        self.shared.cfg.workers
    }

    /// Check if the pool still accepts external jobs.
    #[inline]
    pub fn is_accepting(&self) -> bool {
        is_accepting(self.shared.state.load(Ordering::Acquire))
    }

    /// Worker index of the calling thread within this pool, if any.
    #[inline]
    pub fn current_worker(&self) -> Option<usize> {
        worker_id::worker_of(self.shared.id)
    }
}

// ============================================================================
// ThreadPool
// ============================================================================

/// Work-stealing thread pool running boxed jobs.
///
/// # Lifecycle
///
/// 1. Create with [`ThreadPool::new`]; workers start and park
/// 2. Post jobs through [`ThreadPool::handle`] (or executors built on it)
/// 3. Call [`ThreadPool::join`] to drain, collect metrics, surface panics
///
/// Dropping the pool without `join()` drains it the same way but swallows
/// any recorded panic.
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<WorkerMetricsLocal>>,
}

impl ThreadPool {
    /// Create and start the pool. Panics on an invalid config.
    pub fn new(cfg: ExecutorConfig) -> Self {
        cfg.validate();

        let mut locals = Vec::with_capacity(cfg.workers);
        let mut stealers = Vec::with_capacity(cfg.workers);
        let mut mailboxes = Vec::with_capacity(cfg.workers);
        for _ in 0..cfg.workers {
            let w = Worker::new_lifo();
            stealers.push(w.stealer());
            locals.push(w);
            mailboxes.push(CachePadded::new(Injector::new()));
        }

        let mut parkers = Vec::with_capacity(cfg.workers);
        let mut unparkers = Vec::with_capacity(cfg.workers);
        for _ in 0..cfg.workers {
            let p = Parker::new();
            unparkers.push(p.unparker().clone());
            parkers.push(p);
        }

        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            cfg,
            injector: Injector::new(),
            mailboxes,
            stealers,
            // accepting=1, count=0
            state: AtomicUsize::new(ACCEPTING_BIT),
            done: AtomicBool::new(false),
            unparkers,
            next_unpark: AtomicUsize::new(0),
            panic: Mutex::new(None),
            external_posts: AtomicU64::new(0),
            small_stack_posts: AtomicU64::new(0),
        });

        let mut rngs = worker_streams(cfg.seed, cfg.workers);
        let mut threads = Vec::with_capacity(cfg.workers);

        // Spawn in reverse so pop() hands out the matching deque/parker.
        for worker_id in (0..cfg.workers).rev() {
            let shared = Arc::clone(&shared);
            let local = locals.pop().expect("locals length mismatch");
            let parker = parkers.pop().expect("parkers length mismatch");
            let rng = rngs.pop().expect("rngs length mismatch");

            let th = thread::Builder::new()
                .name(format!("fanout-worker-{worker_id}"))
                .spawn(move || {
                    #[cfg(feature = "affinity")]
                    if shared.cfg.pin_threads {
                        pin_current_thread(worker_id);
                    }

                    let pool_id = shared.id;
                    let slot = WorkerSlot {
                        worker_id,
                        local,
                        parker,
                        rng,
                        metrics: WorkerMetricsLocal::default(),
                        shared: Arc::clone(&shared),
                        local_spawns_since_wake: 0,
                    };
                    CURRENT.with(|c| *c.borrow_mut() = Some(slot));
                    worker_id::set_current_worker(Some((pool_id, worker_id)));

                    worker_loop(&shared);

                    worker_id::set_current_worker(None);
                    CURRENT
                        .with(|c| c.borrow_mut().take())
                        .map(|slot| slot.metrics)
                        .unwrap_or_default()
                })
                .expect("failed to spawn worker thread");

            threads.push(th);
        }

        // threads[0] is worker 0
        threads.reverse();

        debug!(pool = shared.id, workers = cfg.workers, "thread pool started");
        Self { shared, threads }
    }

    /// Handle for posting jobs.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.shared.cfg.workers
    }

    /// Stop accepting external jobs and wait for all work to complete.
    ///
    /// Returns aggregated metrics from all workers.
    ///
    /// # Panics
    ///
    /// If any job panicked, this re-panics on the calling thread with the
    /// first captured payload.
    pub fn join(mut self) -> MetricsSnapshot {
        let snapshot = self.shutdown();

        let first = self
            .shared
            .panic
            .lock()
            .expect("panic mutex poisoned")
            .take();
        if let Some(p) = first {
            panic::resume_unwind(p);
        }

        snapshot
    }

    fn shutdown(&mut self) -> MetricsSnapshot {
        let prev_state = close_gate(&self.shared.state);
        if in_flight(prev_state) == 0 {
            self.shared.initiate_done();
        }

        let mut snapshot = MetricsSnapshot::default();
        while let Some(th) = self.threads.pop() {
            let m = th.join().unwrap_or_else(|p| {
                self.shared.record_panic(p);
                WorkerMetricsLocal::default()
            });
            snapshot.merge_worker(&m);
        }

        snapshot.external_posts = self.shared.external_posts.load(Ordering::Relaxed);
        snapshot.small_stack_tasks = self.shared.small_stack_posts.load(Ordering::Relaxed);

        if snapshot.worker_count > 0 {
            debug!(
                pool = self.shared.id,
                tasks = snapshot.tasks_executed,
                helped = snapshot.helped_tasks,
                max_help_depth = snapshot.max_help_depth,
                steals = snapshot.steal_successes,
                "thread pool stopped"
            );
        }
        snapshot
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            let _ = self.shutdown();
        }
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// Main worker loop: pop → run → account, idle with spin → yield → park.
///
/// Exits once `done` is set, or when it observes a closed pool with no job
/// in flight.
fn worker_loop(shared: &Arc<Shared>) {
    let mut idle = TieredIdle::new();

    loop {
        if shared.done.load(Ordering::Acquire) {
            break;
        }

        let popped = with_slot(shared.id, |slot| pop_task(shared.cfg.steal_tries, slot)).flatten();
        match popped {
            Some((task, _)) => {
                idle.on_work();
                run_job(shared, task, false);
            }
            None => {
                let s = shared.state.load(Ordering::Acquire);
                if in_flight(s) == 0 && !is_accepting(s) {
                    shared.initiate_done();
                    break;
                }
                idle_round(shared, &mut idle);
            }
        }
    }
}

#[cfg(feature = "affinity")]
fn pin_current_thread(worker_id: usize) {
    let cores = match core_affinity::get_core_ids() {
        Some(v) if !v.is_empty() => v,
        _ => {
            warn!(worker_id, "failed to get core ids, skipping affinity");
            return;
        }
    };
    let core = cores[worker_id % cores.len()];
    if !core_affinity::set_for_current(core) {
        warn!(worker_id, core = core.id, "failed to pin worker");
    }
}

// ============================================================================
// Tests
// ============================================================================
