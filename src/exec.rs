//! Executor capability and its two implementations.
//!
//! Everything above the pool is written against [`Executor`]: a place that
//! accepts [`Job`]s, plus provided one-shot and bulk submission built on
//! [`Executor::post`]. [`PoolExecutor`] replaces the flat bulk defaults with
//! the hierarchical spawner; [`InlineExecutor`] runs everything on the
//! submitting thread.

use std::sync::Arc;

use tracing::warn;

use crate::bulk::hierarchical;
use crate::bulk::partition::{check_len, BulkLaunch};
use crate::error::{self, Result, TaskError};
use crate::future::{Promise, TaskFuture};
use crate::policy::ScheduleHint;
use crate::scheduler::{Job, PoolHandle, ThreadPool};

/// Where work runs.
pub trait Executor: Clone + Send + Sync + 'static {
    /// Worker contexts available to bulk operations.
    fn num_workers(&self) -> usize;

    /// Submit one job. `Err` hands the job back when the executor refuses it.
    fn post(&self, hint: ScheduleHint, job: Job) -> std::result::Result<(), Job>;

    /// Run `f` asynchronously; its result or panic lands in the future.
    fn async_execute<R, F>(&self, hint: ScheduleHint, f: F) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.async_try_execute(hint, move || Ok(f()))
    }

    /// [`async_execute`](Self::async_execute) for fallible functions.
    ///
    /// A rejected submission yields a future failed with `ErrorKind::Rejected`.
    fn async_try_execute<R, F>(&self, hint: ScheduleHint, f: F) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let (promise, future) = Promise::new();
        let job: Job = Box::new(move || {
            promise.set(error::catch("async_execute", f).and_then(|r| r));
        });
        match self.post(hint, job) {
            Ok(()) => future,
            Err(_job) => {
                warn!("async_execute rejected by executor");
                TaskFuture::failed(TaskError::rejected("async_execute"))
            }
        }
    }

    /// Run `f` on the calling thread, turning a panic into an error.
    fn sync_execute<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        error::catch("sync_execute", f)
    }

    /// One future per item, `f(&shape[i])` in slot `i`.
    ///
    /// Flat: the caller submits every item itself, item `i` hinted to
    /// context `i mod P`.
    fn bulk_async_execute<I, R, F>(
        &self,
        launch: &BulkLaunch,
        f: F,
        shape: &[I],
    ) -> Result<Vec<TaskFuture<R>>>
    where
        I: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&I) -> R + Send + Sync + 'static,
    {
        check_len(shape.len(), "bulk_async_execute")?;
        let desc = launch.resolve(self.num_workers());
        let f = Arc::new(f);
        Ok(shape
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let f = Arc::clone(&f);
                let item = item.clone();
                let worker = desc.worker(i % desc.num_workers);
                self.async_execute(ScheduleHint::worker(worker), move || f(&item))
            })
            .collect())
    }

    /// Run `f` over every item; one future for the whole batch that fails
    /// with the first error once every item has finished.
    fn bulk_post<I, F>(&self, launch: &BulkLaunch, f: F, shape: &[I]) -> TaskFuture<()>
    where
        I: Clone + Send + Sync + 'static,
        F: Fn(&I) + Send + Sync + 'static,
    {
        let futures = match self.bulk_async_execute(launch, f, shape) {
            Ok(futures) => futures,
            Err(e) => return TaskFuture::failed(e),
        };
        self.async_try_execute(ScheduleHint::NONE, move || {
            // Drain everything before reporting.
            let mut first = None;
            for fut in futures {
                if let Err(e) = fut.get() {
                    first.get_or_insert(e);
                }
            }
            first.map_or(Ok(()), Err)
        })
    }
}

/// Executor over a [`ThreadPool`], with hierarchical bulk submission.
#[derive(Clone, Debug)]
pub struct PoolExecutor {
    handle: PoolHandle,
}

impl PoolExecutor {
    pub fn new(pool: &ThreadPool) -> Self {
        Self {
            handle: pool.handle(),
        }
    }

    pub fn from_handle(handle: PoolHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }
}

impl Executor for PoolExecutor {
    fn num_workers(&self) -> usize {
        self.handle.workers()
    }

    #[inline]
    fn post(&self, hint: ScheduleHint, job: Job) -> std::result::Result<(), Job> {
        self.handle.post(hint, job)
    }

    fn bulk_async_execute<I, R, F>(
        &self,
        launch: &BulkLaunch,
        f: F,
        shape: &[I],
    ) -> Result<Vec<TaskFuture<R>>>
    where
        I: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&I) -> R + Send + Sync + 'static,
    {
        hierarchical::bulk_async_execute(self, launch, f, shape)
    }

    fn bulk_post<I, F>(&self, launch: &BulkLaunch, f: F, shape: &[I]) -> TaskFuture<()>
    where
        I: Clone + Send + Sync + 'static,
        F: Fn(&I) + Send + Sync + 'static,
    {
        hierarchical::bulk_post(self, launch, f, shape)
    }
}

/// Runs every job immediately on the submitting thread. One worker context.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn num_workers(&self) -> usize {
        1
    }

    fn post(&self, _hint: ScheduleHint, job: Job) -> std::result::Result<(), Job> {
        job();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scheduler::ExecutorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_async_execute_is_ready_immediately() {
        let f = InlineExecutor.async_execute(ScheduleHint::NONE, || 5);
        assert!(f.is_ready());
        assert_eq!(f.get().unwrap(), 5);
    }

    #[test]
    fn panics_become_failed_futures() {
        let f = InlineExecutor.async_execute(ScheduleHint::NONE, || -> u8 { panic!("leaf") });
        let err = f.get().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.diagnostics().function, Some("async_execute"));

        let err = InlineExecutor.sync_execute(|| -> u8 { panic!("sync") }).unwrap_err();
        assert_eq!(err.message(), "sync");
    }

    #[test]
    fn inline_flat_bulk_keeps_slot_order() {
        let shape: Vec<usize> = (0..10).collect();
        let futures = InlineExecutor
            .bulk_async_execute(&BulkLaunch::default(), |&i| i * i, &shape)
            .unwrap();
        let values: Vec<_> = futures.into_iter().map(|f| f.get().unwrap()).collect();
        assert_eq!(values, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn flat_bulk_post_reports_first_error_after_draining() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let shape: Vec<usize> = (0..6).collect();
        let done = InlineExecutor.bulk_post(
            &BulkLaunch::default(),
            move |&i| {
                r.fetch_add(1, Ordering::Relaxed);
                if i % 2 == 1 {
                    error::raise(ErrorKind::NoSuccess, "item", format!("item {i}"));
                }
            },
            &shape,
        );
        let err = done.get().unwrap_err();
        assert_eq!(err.message(), "item 1");
        assert_eq!(ran.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn rejected_after_join() {
        let pool = ThreadPool::new(ExecutorConfig {
            workers: 2,
            ..ExecutorConfig::default()
        });
        let exec = PoolExecutor::new(&pool);
        let _ = pool.join();

        let err = exec.async_execute(ScheduleHint::NONE, || 1).get().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }
}
