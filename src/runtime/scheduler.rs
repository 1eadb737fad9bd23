//! The scheduler facade: one worker pool, one reactor, one dispatch thread.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mio::event::Source;
use mio::Interest;

use crate::{Error, Result};

use super::pool::{hardware_concurrency, WorkerPool, Yield};
use super::reactor::{PollSource, Reactor, Sleep};
use super::task::{self, JoinHandle, JoinState, Task};

/// Construction options for a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker thread count. Defaults to hardware concurrency minus one, with
    /// a minimum of one.
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            workers: hardware_concurrency(1),
        }
    }
}

struct Inner {
    pool: WorkerPool,
    reactor: Arc<Reactor>,
    io_thread: Mutex<Option<thread::JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl Inner {
    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        log::debug!("scheduler: shutting down");
        self.reactor.shutdown();
        self.pool.shutdown();

        let io_thread = {
            let mut slot = match self.io_thread.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        if let Some(handle) = io_thread {
            let _ = handle.join();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Owns the worker pool and the reactor, and runs the dedicated reactor
/// thread.
///
/// Handles are cheap to clone and share one runtime; the runtime shuts down
/// when [`shutdown`] is called or the last handle is dropped. Shutting down
/// cancels all pending I/O, drains the worker queue, and joins every thread.
///
/// [`shutdown`]: Scheduler::shutdown
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// A scheduler with default options.
    pub fn new() -> Result<Scheduler> {
        Self::with_config(SchedulerConfig::default())
    }

    /// A scheduler with the given options.
    pub fn with_config(config: SchedulerConfig) -> Result<Scheduler> {
        let (reactor, poll) = Reactor::new()?;
        let reactor = Arc::new(reactor);
        let pool = WorkerPool::new(config.workers);

        let io_thread = {
            let reactor = Arc::clone(&reactor);
            thread::Builder::new()
                .name("nett-reactor".to_owned())
                .spawn(move || reactor.run(poll))
                .map_err(Error::from)?
        };

        log::debug!("scheduler: started with {} workers", pool.concurrency());
        Ok(Scheduler {
            inner: Arc::new(Inner {
                pool,
                reactor,
                io_thread: Mutex::new(Some(io_thread)),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Hands `future` to the worker pool for execution and returns the handle
    /// to its result.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let state = JoinState::new();
        let handle = JoinHandle::new(Arc::clone(&state));

        let pool = self.inner.pool.shared();
        let task = Task::new(Arc::clone(&pool), Box::pin(task::wrap(future, state)));
        pool.resume(task);

        handle
    }

    /// Suspends until `source` is ready for `interest`, the timeout fires
    /// (`Err(TimedOut)`), or the scheduler shuts down (`Err(Cancelled)`).
    ///
    /// `None` means no timeout. Readiness completes with `Ok`; the count is
    /// zero on readiness-based backends.
    pub async fn poll<S: Source>(
        &self,
        source: &mut S,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        PollSource::new(&self.inner.reactor, source, interest, timeout).await
    }

    /// Suspends for at least `duration`.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        Sleep::new(&self.inner.reactor, duration).await
    }

    /// Reposts the current task at the tail of the worker queue, letting
    /// everything already queued run first.
    pub async fn yield_now(&self) {
        Yield::new().await
    }

    /// Tasks queued or executing on the worker pool.
    pub fn pending_jobs(&self) -> usize {
        self.inner.pool.jobs()
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.inner.pool.concurrency()
    }

    /// Stops the reactor (cancelling pending I/O), drains and joins the
    /// worker pool, then joins the reactor thread. Idempotent.
    ///
    /// Must not be called from inside a task.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.inner.pool.concurrency())
            .field("jobs", &self.inner.pool.jobs())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}
