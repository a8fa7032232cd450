//! Single-assignment futures and their promises.
//!
//! A [`Promise`] is the write end, a [`TaskFuture`] the read end. The value
//! is a [`Result`]: a failed task stores its [`TaskError`] and `get()`
//! returns it. Dropping a promise without fulfilling it stores
//! `ErrorKind::BrokenPromise`, so a reader can never wait forever on a
//! writer that went away.
//!
//! Waiting on a pool worker helps the pool instead of blocking (same rule as
//! [`Latch::wait`](crate::sync::Latch::wait)).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Result, TaskError};
use crate::exec::Executor;
use crate::policy::ScheduleHint;
use crate::scheduler::help_until;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Slot<T> {
    value: Option<Result<T>>,
    callbacks: Vec<Callback>,
}

struct FutureState<T> {
    ready: AtomicBool,
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> FutureState<T> {
    fn new(value: Option<Result<T>>) -> Self {
        Self {
            ready: AtomicBool::new(value.is_some()),
            slot: Mutex::new(Slot {
                value,
                callbacks: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    #[inline]
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn fulfil(&self, value: Result<T>) {
        let callbacks = {
            let mut slot = self.slot.lock().expect("future mutex poisoned");
            debug_assert!(slot.value.is_none(), "future fulfilled twice");
            slot.value = Some(value);
            self.ready.store(true, Ordering::Release);
            self.cond.notify_all();
            std::mem::take(&mut slot.callbacks)
        };
        for cb in callbacks {
            cb();
        }
    }

    fn wait(&self) {
        if self.is_ready() {
            return;
        }
        if help_until(&|| self.is_ready()) {
            return;
        }
        let mut slot = self.slot.lock().expect("future mutex poisoned");
        while !self.is_ready() {
            slot = self.cond.wait(slot).expect("future mutex poisoned");
        }
    }

    /// Run `cb` once the value is set; immediately if it already is.
    fn on_ready(&self, cb: Callback) {
        {
            let mut slot = self.slot.lock().expect("future mutex poisoned");
            if !self.is_ready() {
                slot.callbacks.push(cb);
                return;
            }
        }
        cb();
    }

    fn take(&self) -> Result<T> {
        self.slot
            .lock()
            .expect("future mutex poisoned")
            .value
            .take()
            .unwrap_or_else(|| Err(TaskError::broken_promise()))
    }
}

/// Write end of a [`TaskFuture`].
pub struct Promise<T> {
    state: Option<Arc<FutureState<T>>>,
}

impl<T> Promise<T> {
    /// Connected promise/future pair.
    pub fn new() -> (Promise<T>, TaskFuture<T>) {
        let state = Arc::new(FutureState::new(None));
        (
            Promise {
                state: Some(Arc::clone(&state)),
            },
            TaskFuture { state },
        )
    }

    pub fn set(mut self, value: Result<T>) {
        if let Some(state) = self.state.take() {
            state.fulfil(value);
        }
    }

    pub fn set_value(self, value: T) {
        self.set(Ok(value));
    }

    pub fn set_error(self, err: TaskError) {
        self.set(Err(err));
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.fulfil(Err(TaskError::broken_promise()));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("fulfilled", &self.state.is_none())
            .finish()
    }
}

/// Read end: a value (or error) that becomes available later.
#[must_use = "a TaskFuture does nothing unless waited on"]
pub struct TaskFuture<T> {
    state: Arc<FutureState<T>>,
}

impl<T> TaskFuture<T> {
    /// Already-completed future holding `value`.
    pub fn ready(value: T) -> Self {
        Self {
            state: Arc::new(FutureState::new(Some(Ok(value)))),
        }
    }

    /// Already-completed future holding `err`.
    pub fn failed(err: TaskError) -> Self {
        Self {
            state: Arc::new(FutureState::new(Some(Err(err)))),
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Ready and holding an error. Never blocks.
    pub fn has_exception(&self) -> bool {
        self.is_ready()
            && matches!(
                self.state.slot.lock().expect("future mutex poisoned").value,
                Some(Err(_))
            )
    }

    /// Block until ready.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Block until ready and take the value or the stored error.
    pub fn get(self) -> Result<T> {
        self.state.wait();
        self.state.take()
    }
}

impl<T: Send + 'static> TaskFuture<T> {
    /// Run `f` on `executor` with this future's outcome once it is ready.
    ///
    /// If the executor rejects the continuation it runs on the thread that
    /// completed this future.
    pub fn then<E, U, F>(self, executor: &E, f: F) -> TaskFuture<U>
    where
        E: Executor,
        U: Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.then_try(executor, move |r| Ok(f(r)))
    }

    /// Like [`then`](Self::then), for continuations that can fail.
    pub fn then_try<E, U, F>(self, executor: &E, f: F) -> TaskFuture<U>
    where
        E: Executor,
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        let (promise, next) = Promise::new();
        let state = Arc::clone(&self.state);
        let executor = executor.clone();
        self.state.on_ready(Box::new(move || {
            let job: Box<dyn FnOnce() + Send> = Box::new(move || {
                let outcome = crate::error::catch("then", || f(state.take())).and_then(|r| r);
                promise.set(outcome);
            });
            if let Err(job) = executor.post(ScheduleHint::NONE, job) {
                job();
            }
        }));
        next
    }
}

impl<T> TaskFuture<T> {
    /// Second handle on the same state. Only one of them may `get()`.
    pub(crate) fn share(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Wait for every future; `true` if any of them holds an error.
///
/// Never fails itself and leaves the values in place.
pub fn wait_all<T>(futures: &[TaskFuture<T>]) -> bool {
    let mut any_failed = false;
    for f in futures {
        f.wait();
        any_failed |= f.has_exception();
    }
    any_failed
}
