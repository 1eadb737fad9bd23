//! The worker pool: N OS threads resuming ready tasks from one FIFO.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use std::thread;

use super::task::Task;

/// Number of available hardware threads minus `minus`, never less than 1.
pub fn hardware_concurrency(minus: usize) -> usize {
    let count = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    if count > 1 && count > minus {
        count - minus
    } else {
        1
    }
}

/// State shared between the pool handle, its worker threads, and task wakers.
pub(crate) struct PoolShared {
    queue: Mutex<VecDeque<Arc<Task>>>,
    available: Condvar,
    running: AtomicBool,
    jobs: AtomicUsize,
}

impl PoolShared {
    /// Enqueues a ready task at the tail of the FIFO.
    pub(crate) fn resume(&self, task: Arc<Task>) {
        if !self.running.load(Ordering::Acquire) {
            // the workers are gone; releasing the reference lets the frame
            // drop, which cancels any awaiters
            drop(task);
            return;
        }

        self.jobs.fetch_add(1, Ordering::Release);
        {
            let mut queue = self.queue.lock().expect("worker queue poisoned");
            queue.push_back(task);
        }
        self.available.notify_one();
    }

    /// Queued plus currently executing tasks.
    pub(crate) fn jobs(&self) -> usize {
        self.jobs.load(Ordering::Acquire)
    }
}

/// A fixed set of worker threads draining the shared FIFO.
pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(concurrency: usize) -> WorkerPool {
        let concurrency = concurrency.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            jobs: AtomicUsize::new(0),
        });

        let mut threads = Vec::with_capacity(concurrency);
        for i in 0..concurrency {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("nett-worker-{}", i))
                .spawn(move || worker(shared))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }

        WorkerPool {
            shared,
            threads: Mutex::new(threads),
        }
    }

    pub(crate) fn shared(&self) -> Arc<PoolShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn concurrency(&self) -> usize {
        match self.threads.lock() {
            Ok(threads) => threads.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub(crate) fn jobs(&self) -> usize {
        self.shared.jobs()
    }

    /// Stops the workers and joins them. Already-queued tasks are drained
    /// before the threads exit, so continuations woken by a reactor shutdown
    /// still observe their cancellation results. Idempotent.
    ///
    /// Must not be called from a worker thread.
    pub(crate) fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.shared.available.notify_all();

        let threads = {
            let mut threads = match self.threads.lock() {
                Ok(threads) => threads,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *threads)
        };
        for handle in threads {
            let _ = handle.join();
        }
    }
}

fn worker(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("worker queue poisoned");
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .expect("worker queue poisoned");
            }
        };

        // The failure of a panicking task is discarded; its awaiters observe
        // a cancellation.
        if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            log::error!("worker: task panicked; destroying its frame");
            task.clear();
        }

        shared.jobs.fetch_sub(1, Ordering::Release);
    }
}

/// Reposts the current task at the tail of the pool FIFO: ready immediately,
/// but everything already queued runs first.
pub(crate) struct Yield {
    yielded: bool,
}

impl Yield {
    pub(crate) fn new() -> Self {
        Yield { yielded: false }
    }
}

impl Future for Yield {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
