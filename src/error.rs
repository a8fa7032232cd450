//! Task errors and the diagnostic context attached to them.
//!
//! # Model
//!
//! Every user function the core runs executes under `catch_unwind`. Whatever
//! unwinds out of it is turned into a [`TaskError`] by [`capture`]:
//!
//! | Panic payload | Resulting error |
//! |---------------|-----------------|
//! | `TaskError` (via [`raise`]) | kept verbatim, including its diagnostics |
//! | `&'static str` / `String` | `ErrorKind::Panicked` with the message |
//! | anything else | `ErrorKind::Panicked`, opaque message |
//!
//! Code that wants to fail with a structured error instead of a bare panic
//! calls [`raise`]. The error records where it was raised (file, line),
//! which pool worker and OS thread raised it, and the process id, so a
//! failure surfacing on the caller's thread can still be traced back to the
//! worker that produced it.
//!
//! Errors are never retried or swallowed by the core. Which error a caller
//! sees when several items fail concurrently is decided by
//! [`ExceptionSlot`](crate::sync::ExceptionSlot): the first one recorded.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::thread;

use thiserror::Error;

use crate::scheduler::worker_id;

/// Result alias used across the crate.
pub type Result<T, E = TaskError> = std::result::Result<T, E>;

/// Coarse classification of a [`TaskError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// Generic failure raised by user code.
    #[error("no success")]
    NoSuccess,
    /// Invalid input to a core operation (e.g. a shape that is too large).
    #[error("bad parameter")]
    BadParameter,
    /// A user function panicked with a non-`TaskError` payload.
    #[error("panicked")]
    Panicked,
    /// The executor refused the work (pool shut down).
    #[error("rejected")]
    Rejected,
    /// A promise was dropped before it was fulfilled.
    #[error("broken promise")]
    BrokenPromise,
}

/// Where and on which thread an error was produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostics {
    /// Name of the operation or function that failed.
    pub function: Option<&'static str>,
    /// Source file of the raise site, when known.
    pub file: Option<&'static str>,
    /// Source line of the raise site, when known.
    pub line: Option<u32>,
    /// Pool worker index, `None` off-pool.
    pub worker: Option<usize>,
    /// OS thread name, if the thread is named.
    pub os_thread: Option<String>,
    /// OS thread id (debug rendering of `ThreadId`).
    pub thread_id: String,
    /// Process id.
    pub process_id: u32,
}

impl Diagnostics {
    /// Capture the current thread's context.
    pub fn capture(location: Option<&'static Location<'static>>) -> Self {
        let current = thread::current();
        Self {
            function: None,
            file: location.map(|l| l.file()),
            line: location.map(|l| l.line()),
            worker: worker_id::current_worker_id(),
            os_thread: current.name().map(str::to_owned),
            thread_id: format!("{:?}", current.id()),
            process_id: std::process::id(),
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[function]: {}", self.function.unwrap_or("<unknown>"))?;
        writeln!(f, "[file]: {}", self.file.unwrap_or("<unknown>"))?;
        match self.line {
            Some(line) => writeln!(f, "[line]: {line}")?,
            None => writeln!(f, "[line]: <unknown>")?,
        }
        match self.worker {
            Some(w) => writeln!(f, "[worker]: {w}")?,
            None => writeln!(f, "[worker]: <none>")?,
        }
        writeln!(f, "[os-thread]: {}", self.os_thread.as_deref().unwrap_or("<unnamed>"))?;
        writeln!(f, "[thread-id]: {}", self.thread_id)?;
        write!(f, "[pid]: {}", self.process_id)
    }
}

/// Error produced by a task, a bulk operation, or a scan.
#[derive(Clone, Debug, Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    kind: ErrorKind,
    message: String,
    diagnostics: Box<Diagnostics>,
}

impl TaskError {
    /// Create an error, recording the caller's location and thread.
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostics: Box::new(Diagnostics::capture(Some(Location::caller()))),
        }
    }

    /// Attach the name of the failing operation (first one wins).
    pub fn with_function(mut self, function: &'static str) -> Self {
        if self.diagnostics.function.is_none() {
            self.diagnostics.function = Some(function);
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Message plus every diagnostic element, one per line.
    pub fn diagnostic_information(&self) -> String {
        format!("{self}\n{}", self.diagnostics)
    }

    #[track_caller]
    pub(crate) fn rejected(function: &'static str) -> Self {
        Self::new(ErrorKind::Rejected, "executor is not accepting work").with_function(function)
    }

    #[track_caller]
    pub(crate) fn broken_promise() -> Self {
        Self::new(
            ErrorKind::BrokenPromise,
            "promise dropped before a value was set",
        )
    }
}

/// Fail the current task with a structured error.
///
/// Unwinds with a [`TaskError`] payload; the core's task wrappers recover it
/// unchanged through [`capture`].
#[track_caller]
pub fn raise(kind: ErrorKind, function: &'static str, message: impl Into<String>) -> ! {
    panic::panic_any(TaskError::new(kind, message).with_function(function))
}

/// Convert a panic payload into a [`TaskError`].
pub fn capture(payload: Box<dyn Any + Send + 'static>) -> TaskError {
    match payload.downcast::<TaskError>() {
        Ok(err) => *err,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
                (*s).to_owned()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "opaque panic payload".to_owned()
            };
            TaskError {
                kind: ErrorKind::Panicked,
                message,
                diagnostics: Box::new(Diagnostics::capture(None)),
            }
        }
    }
}

/// Run `f`, turning any unwind into a [`TaskError`] tagged with `function`.
#[inline]
pub(crate) fn catch<R>(function: &'static str, f: impl FnOnce() -> R) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|p| capture(p).with_function(function))
}
