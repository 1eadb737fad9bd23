//! Tasks and their completion slots.
//!
//! A task owns one pinned future and runs it to completion across suspensions.
//! Its [`std::task::Waker`] is the continuation: waking it re-enqueues the
//! task at the tail of the worker pool's FIFO. The [`JoinHandle`] is the
//! promise side, holding the result and the waker of whoever awaits it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use crate::{Error, Result};

use super::pool::PoolShared;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One cooperative unit of execution. The frame stays pinned in its box for
/// the task's whole life; the cell is shared between the pool queue and any
/// outstanding wakers.
pub(crate) struct Task {
    future: Mutex<Option<BoxFuture>>,
    pool: Arc<PoolShared>,
}

impl Task {
    pub(crate) fn new(pool: Arc<PoolShared>, future: BoxFuture) -> Arc<Task> {
        Arc::new(Task {
            future: Mutex::new(Some(future)),
            pool,
        })
    }

    /// Polls the task once. Completion drops the frame; a pending poll leaves
    /// it in place for the next wake. The mutex keeps two continuations of the
    /// same task from ever running concurrently.
    pub(crate) fn run(self: &Arc<Self>) {
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);

        let mut slot = lock_unpoisoned(&self.future);
        let Some(future) = slot.as_mut() else {
            // already completed; a stale wake got here first
            return;
        };

        if future.as_mut().poll(&mut cx).is_ready() {
            *slot = None;
        }
    }

    /// Destroys the frame unconditionally (used after a panic escaped a poll).
    pub(crate) fn clear(&self) {
        *lock_unpoisoned(&self.future) = None;
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        let pool = Arc::clone(&self.pool);
        pool.resume(self);
    }
}

struct JoinValue<T> {
    result: Option<Result<T>>,
    finished: bool,
    waker: Option<Waker>,
}

/// Shared completion slot between a running task and its awaiter.
pub(crate) struct JoinState<T> {
    value: Mutex<JoinValue<T>>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(JoinState {
            value: Mutex::new(JoinValue {
                result: None,
                finished: false,
                waker: None,
            }),
        })
    }

    fn finish(&self, result: Result<T>) {
        let waker = {
            let mut value = lock_unpoisoned(&self.value);
            if value.finished {
                return;
            }
            value.result = Some(result);
            value.finished = true;
            value.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

// Completes the join state when the wrapper finishes; completing it from
// `drop` covers frames destroyed before running to the end (shutdown drains,
// panics), which surface as `Cancelled` to the awaiter.
struct CompletionGuard<T> {
    state: Option<Arc<JoinState<T>>>,
}

impl<T> CompletionGuard<T> {
    fn complete(&mut self, value: T) {
        if let Some(state) = self.state.take() {
            state.finish(Ok(value));
        }
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.finish(Err(Error::Cancelled));
        }
    }
}

/// Wraps a user future so its output lands in `state` no matter how the frame
/// ends.
pub(crate) fn wrap<F>(future: F, state: Arc<JoinState<F::Output>>) -> impl Future<Output = ()> + Send
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    async move {
        let mut guard = CompletionGuard { state: Some(state) };
        let value = future.await;
        guard.complete(value);
    }
}

/// Awaitable handle to a spawned task's result.
///
/// Awaiting stores the awaiter's waker as the task's continuation and resolves
/// once the task completes. The result moves out to the first awaiter; a task
/// whose frame was destroyed before completing (scheduler shutdown, panic)
/// resolves to [`Error::Cancelled`]. Dropping the handle detaches the task.
pub struct JoinHandle<T> {
    state: Arc<JoinState<T>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(state: Arc<JoinState<T>>) -> Self {
        JoinHandle { state }
    }

    /// Whether the task has completed (or been destroyed).
    pub fn is_finished(&self) -> bool {
        lock_unpoisoned(&self.state.value).finished
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut value = lock_unpoisoned(&self.state.value);
        if value.finished {
            Poll::Ready(value.result.take().unwrap_or(Err(Error::Cancelled)))
        } else {
            value.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

struct Unpark {
    thread: Thread,
}

impl Wake for Unpark {
    fn wake(self: Arc<Self>) {
        self.thread.unpark();
    }
}

/// Drives `future` to completion on the current thread, parking between
/// polls. This is how synchronous code (main, tests) enters the runtime.
///
/// ```
/// let value = nett::runtime::block_on(async { 40 + 2 });
/// assert_eq!(value, 42);
/// ```
pub fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = std::pin::pin!(future);
    let waker = Waker::from(Arc::new(Unpark {
        thread: thread::current(),
    }));
    let mut cx = Context::from_waker(&waker);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => thread::park(),
        }
    }
}
