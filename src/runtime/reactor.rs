//! The reactor: readiness, timeouts, and wake-ups multiplexed onto one OS
//! primitive through mio (epoll on Linux, kqueue on the BSDs and macOS, IOCP
//! on Windows).
//!
//! Each submitted operation gets a slab slot; the slot key travels through the
//! kernel as the mio [`Token`] and comes back in the event, so event delivery
//! never needs to search. Deadlines sit in a min-heap and the earliest one
//! becomes the poll timeout, i.e. at most one kernel-level timer is armed and
//! it is re-armed to the next deadline as entries fire.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll as TaskPoll, Waker};
use std::time::{Duration, Instant};

use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;

use crate::{Error, Result};

const WAKE_TOKEN: Token = Token(usize::MAX - 1);
const EVENTS_CAPACITY: usize = 1024;

struct OpState {
    waker: Waker,
    result: Option<Result<usize>>,
    seq: u64,
}

#[derive(PartialEq, Eq)]
struct TimerEntry {
    at: Instant,
    key: usize,
    seq: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at
            .cmp(&other.at)
            .then(self.seq.cmp(&other.seq))
            .then(self.key.cmp(&other.key))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    ops: Slab<OpState>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    // deadline the dispatch loop is currently sleeping towards
    next_wake: Option<Instant>,
    seq: u64,
}

pub(crate) struct Reactor {
    registry: Registry,
    waker: mio::Waker,
    shared: Mutex<Shared>,
    shutdown: AtomicBool,
}

impl Reactor {
    /// Creates the reactor and the [`Poll`] its dispatch thread will drive.
    pub(crate) fn new() -> Result<(Reactor, Poll)> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = mio::Waker::new(poll.registry(), WAKE_TOKEN)?;

        let reactor = Reactor {
            registry,
            waker,
            shared: Mutex::new(Shared {
                ops: Slab::with_capacity(64),
                timers: BinaryHeap::new(),
                next_wake: None,
                seq: 0,
            }),
            shutdown: AtomicBool::new(false),
        };
        Ok((reactor, poll))
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records a pending operation and returns its token key. The waker is
    /// woken exactly once: on readiness, deadline expiry, or shutdown.
    fn submit(&self, waker: Waker, timeout: Option<Duration>) -> Result<usize> {
        let mut wake_loop = false;
        let key = {
            let mut shared = self.lock();
            if self.shutdown.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }

            shared.seq += 1;
            let seq = shared.seq;
            let key = shared.ops.insert(OpState {
                waker,
                result: None,
                seq,
            });

            if let Some(timeout) = timeout {
                let at = Instant::now() + timeout;
                shared.timers.push(Reverse(TimerEntry { at, key, seq }));
                // only interrupt the poll if this deadline is now the earliest
                wake_loop = shared.next_wake.map_or(true, |next| at < next);
            }

            key
        };

        if wake_loop {
            let _ = self.waker.wake();
        }

        log::trace!("reactor: queued op {}", key);
        Ok(key)
    }

    /// Takes the operation's result if it completed; otherwise refreshes the
    /// stored continuation.
    fn check(&self, key: usize, waker: &Waker) -> Option<Result<usize>> {
        let mut shared = self.lock();
        let Some(op) = shared.ops.get_mut(key) else {
            return Some(Err(Error::Cancelled));
        };

        match op.result.take() {
            Some(result) => {
                shared.ops.remove(key);
                Some(result)
            }
            None => {
                if !op.waker.will_wake(waker) {
                    op.waker = waker.clone();
                }
                None
            }
        }
    }

    /// Forgets a pending operation whose awaiter went away. Its timer entry,
    /// if any, is skipped lazily by the sequence check.
    fn cancel(&self, key: usize) {
        let mut shared = self.lock();
        if shared.ops.contains(key) {
            shared.ops.remove(key);
        }
    }

    /// Stops the dispatch loop. Idempotent.
    pub(crate) fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let _ = self.waker.wake();
        }
    }

    /// The dispatch loop, run on the scheduler's dedicated reactor thread
    /// until shutdown.
    pub(crate) fn run(&self, mut poll: Poll) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        log::debug!("reactor: dispatch loop started");

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let timeout = self.arm_timer();
            if let Err(err) = poll.poll(&mut events, timeout) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                log::error!("reactor: poll failed: {}", err);
                break;
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.dispatch(&events);
        }

        self.drain();
        log::debug!("reactor: dispatch loop stopped");
    }

    // Prunes dead deadline entries and returns the time left until the next
    // live one.
    fn arm_timer(&self) -> Option<Duration> {
        let mut shared = self.lock();

        loop {
            let stale = match shared.timers.peek() {
                Some(Reverse(entry)) => match shared.ops.get(entry.key) {
                    Some(op) => op.seq != entry.seq || op.result.is_some(),
                    None => true,
                },
                None => break,
            };
            if !stale {
                break;
            }
            shared.timers.pop();
        }

        let next = shared.timers.peek().map(|Reverse(entry)| entry.at);
        shared.next_wake = next;
        next.map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn dispatch(&self, events: &Events) {
        let mut ready: Vec<Waker> = Vec::new();

        {
            let mut shared = self.lock();

            // I/O completions are delivered before expired deadlines: a
            // descriptor that became ready in the same kernel batch as its
            // deadline counts as success, not timeout.
            for event in events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    // wake-up or spurious; the loop re-arms on its own
                    continue;
                }

                if let Some(op) = shared.ops.get_mut(token.0) {
                    if op.result.is_none() {
                        op.result = Some(event_result(event));
                        ready.push(op.waker.clone());
                    }
                }
            }

            let now = Instant::now();
            loop {
                let due = matches!(shared.timers.peek(), Some(Reverse(entry)) if entry.at <= now);
                if !due {
                    break;
                }
                let Some(Reverse(entry)) = shared.timers.pop() else {
                    break;
                };

                if let Some(op) = shared.ops.get_mut(entry.key) {
                    if op.seq == entry.seq && op.result.is_none() {
                        op.result = Some(Err(Error::TimedOut));
                        ready.push(op.waker.clone());
                    }
                }
            }
        }

        if !ready.is_empty() {
            log::trace!("reactor: delivering {} completions", ready.len());
        }
        for waker in ready {
            waker.wake();
        }
    }

    // Completes everything still pending with `Cancelled`.
    fn drain(&self) {
        let mut ready: Vec<Waker> = Vec::new();

        {
            let mut shared = self.lock();
            shared.timers.clear();
            shared.next_wake = None;

            for (_, op) in shared.ops.iter_mut() {
                if op.result.is_none() {
                    op.result = Some(Err(Error::Cancelled));
                    ready.push(op.waker.clone());
                }
            }
        }

        if !ready.is_empty() {
            log::debug!("reactor: cancelling {} pending operations", ready.len());
        }
        for waker in ready {
            waker.wake();
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// Readiness backends do not report byte counts; an event that carries only
// closed flags means the peer is gone before the operation could proceed.
fn event_result(event: &Event) -> Result<usize> {
    if (event.is_read_closed() || event.is_write_closed())
        && !event.is_readable()
        && !event.is_writable()
    {
        return Err(Error::Closed);
    }
    Ok(0)
}

/// Awaitable registration of one I/O operation: readiness on `source` for
/// `interest`, bounded by `timeout` (`None` = unbounded).
pub(crate) struct PollSource<'a, S: Source> {
    reactor: &'a Reactor,
    source: &'a mut S,
    interest: Interest,
    timeout: Option<Duration>,
    key: Option<usize>,
    done: bool,
}

impl<'a, S: Source> PollSource<'a, S> {
    pub(crate) fn new(
        reactor: &'a Reactor,
        source: &'a mut S,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Self {
        PollSource {
            reactor,
            source,
            interest,
            timeout,
            key: None,
            done: false,
        }
    }
}

impl<S: Source> Future for PollSource<'_, S> {
    type Output = Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> TaskPoll<Self::Output> {
        let this = self.get_mut();

        match this.key {
            None => {
                let key = match this.reactor.submit(cx.waker().clone(), this.timeout) {
                    Ok(key) => key,
                    Err(err) => {
                        this.done = true;
                        return TaskPoll::Ready(Err(err));
                    }
                };

                if let Err(err) = this
                    .reactor
                    .registry()
                    .register(this.source, Token(key), this.interest)
                {
                    this.reactor.cancel(key);
                    this.done = true;
                    return TaskPoll::Ready(Err(err.into()));
                }

                this.key = Some(key);
                TaskPoll::Pending
            }
            Some(key) => match this.reactor.check(key, cx.waker()) {
                Some(result) => {
                    this.done = true;
                    let _ = this.reactor.registry().deregister(this.source);
                    TaskPoll::Ready(result)
                }
                None => TaskPoll::Pending,
            },
        }
    }
}

impl<S: Source> Drop for PollSource<'_, S> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            if !self.done {
                self.reactor.cancel(key);
                let _ = self.reactor.registry().deregister(self.source);
            }
        }
    }
}

/// Awaitable pure-timer operation; completes when the deadline fires.
pub(crate) struct Sleep<'a> {
    reactor: &'a Reactor,
    duration: Duration,
    key: Option<usize>,
    done: bool,
}

impl<'a> Sleep<'a> {
    pub(crate) fn new(reactor: &'a Reactor, duration: Duration) -> Self {
        Sleep {
            reactor,
            duration,
            key: None,
            done: false,
        }
    }
}

impl Future for Sleep<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> TaskPoll<Self::Output> {
        let this = self.get_mut();

        match this.key {
            None => match this.reactor.submit(cx.waker().clone(), Some(this.duration)) {
                Ok(key) => {
                    this.key = Some(key);
                    TaskPoll::Pending
                }
                Err(err) => {
                    this.done = true;
                    TaskPoll::Ready(Err(err))
                }
            },
            Some(key) => match this.reactor.check(key, cx.waker()) {
                Some(result) => {
                    this.done = true;
                    TaskPoll::Ready(match result {
                        Ok(_) | Err(Error::TimedOut) => Ok(()),
                        Err(err) => Err(err),
                    })
                }
                None => TaskPoll::Pending,
            },
        }
    }
}

impl Drop for Sleep<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            if !self.done {
                self.reactor.cancel(key);
            }
        }
    }
}
