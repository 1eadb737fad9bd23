//! A bounded pool of reusable resources.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::io::{Error, Reader, Result, Writer};

struct State<T> {
    idle: Vec<T>,
    // idle plus borrowed
    total: usize,
    waiting: usize,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    available: Condvar,
    target: usize,
    max: usize,
    make: Box<dyn Fn() -> Result<T> + Send + Sync>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn put(&self, value: T) {
        let mut state = self.lock();

        // over the target with nobody waiting: drop the resource so bursts
        // shrink back
        if state.idle.len() >= self.target && state.waiting == 0 {
            state.total -= 1;
            return;
        }

        state.idle.push(value);
        drop(state);
        self.available.notify_one();
    }

    fn forget_one(&self) {
        let mut state = self.lock();
        state.total -= 1;
        drop(state);
        // a waiter may now create a replacement
        self.available.notify_one();
    }
}

/// A bounded pool of `T` with a target size and a hard maximum.
///
/// [`get`] pops an idle resource, creates one through the factory while the
/// pool is below its maximum, and otherwise blocks until a resource comes
/// back. Resources return to the pool when their [`Pooled`] guard drops;
/// returns above the target size are dropped unless someone is waiting.
///
/// Handles are cheap to clone and share one pool.
///
/// [`get`]: Pool::get
pub struct Pool<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send> Pool<T> {
    /// A pool that keeps up to `target` idle resources and never has more
    /// than `max` outstanding.
    ///
    /// # Panics
    ///
    /// Panics if `max < target` or `max == 0`.
    pub fn new<F>(target: usize, max: usize, make: F) -> Pool<T>
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        assert!(max >= target, "pool max must be at least its target");
        assert!(max > 0, "pool max must be non-zero");

        Pool {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    idle: Vec::with_capacity(target),
                    total: 0,
                    waiting: 0,
                }),
                available: Condvar::new(),
                target,
                max,
                make: Box::new(make),
            }),
        }
    }

    /// Borrows a resource, blocking while the pool is at its maximum with
    /// nothing idle. Fails only if the factory fails.
    pub fn get(&self) -> Result<Pooled<T>> {
        self.get_timeout(None)
    }

    /// Like [`get`], but gives up with [`Error::TimedOut`] once `timeout` has
    /// elapsed without a resource coming back. `None` waits forever.
    ///
    /// [`get`]: Pool::get
    pub fn get_timeout(&self, timeout: Option<Duration>) -> Result<Pooled<T>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.inner.lock();

        loop {
            if let Some(value) = state.idle.pop() {
                return Ok(self.wrap(value));
            }

            if state.total < self.inner.max {
                state.total += 1;
                drop(state);
                return match (self.inner.make)() {
                    Ok(value) => Ok(self.wrap(value)),
                    Err(err) => {
                        self.inner.forget_one();
                        Err(err)
                    }
                };
            }

            match deadline {
                None => {
                    state.waiting += 1;
                    state = match self.inner.available.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    state.waiting -= 1;
                }
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    if wait.is_zero() {
                        return Err(Error::TimedOut);
                    }

                    state.waiting += 1;
                    let (guard, _timed_out) =
                        match self.inner.available.wait_timeout(state, wait) {
                            Ok(pair) => pair,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                    state = guard;
                    state.waiting -= 1;
                    // the loop re-checks for an idle resource or freed
                    // capacity and gives up once the deadline has passed
                }
            }
        }
    }

    /// Borrows an idle resource without blocking or creating one.
    pub fn try_get(&self) -> Option<Pooled<T>> {
        let value = self.inner.lock().idle.pop()?;
        Some(self.wrap(value))
    }

    /// Idle resources currently in the pool.
    pub fn available(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Resources outstanding, idle and borrowed together.
    pub fn size(&self) -> usize {
        self.inner.lock().total
    }

    fn wrap(&self, value: T) -> Pooled<T> {
        Pooled {
            value: Some(value),
            inner: Arc::clone(&self.inner),
            discard: false,
        }
    }
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Pool")
            .field("target", &self.inner.target)
            .field("max", &self.inner.max)
            .field("idle", &state.idle.len())
            .field("total", &state.total)
            .finish()
    }
}

/// A borrowed pool resource; returns to the pool on drop.
pub struct Pooled<T> {
    value: Option<T>,
    inner: Arc<Inner<T>>,
    discard: bool,
}

impl<T> Pooled<T> {
    /// Keeps the resource and shrinks the pool by one instead of returning it.
    pub fn detach(mut self) -> T {
        let value = self.value.take().expect("pooled value already taken");
        self.inner.forget_one();
        value
    }

    /// Marks the resource to be dropped on return instead of going back to
    /// the pool. The borrow stays usable until then.
    pub fn discard_on_drop(&mut self) {
        self.discard = true;
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("pooled value already taken")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value already taken")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if self.discard {
                self.inner.forget_one();
            } else {
                self.inner.put(value);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.value).finish()
    }
}

impl<T: Reader> Reader for Pooled<T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.deref_mut().read(buf).await
    }
}

impl<T: Writer> Writer for Pooled<T> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.deref_mut().write(buf).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.deref_mut().flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_pool(target: usize, max: usize) -> (Pool<usize>, Arc<AtomicUsize>) {
        let made = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&made);
        let pool = Pool::new(target, max, move || {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });
        (pool, made)
    }

    #[test]
    fn creates_lazily_and_reuses() {
        let (pool, made) = counting_pool(2, 4);

        let first = pool.get().unwrap();
        assert_eq!(*first, 0);
        drop(first);

        let again = pool.get().unwrap();
        assert_eq!(*again, 0);
        assert_eq!(made.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn try_get_never_creates() {
        let (pool, made) = counting_pool(1, 2);
        assert!(pool.try_get().is_none());
        assert_eq!(made.load(Ordering::SeqCst), 0);

        drop(pool.get().unwrap());
        assert!(pool.try_get().is_some());
    }

    #[test]
    fn bursts_shrink_back_to_target() {
        let (pool, _) = counting_pool(1, 3);

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        let c = pool.get().unwrap();
        assert_eq!(pool.size(), 3);

        drop(a);
        drop(b);
        drop(c);

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn get_timeout_gives_up_at_max() {
        let (pool, _) = counting_pool(1, 1);
        let borrowed = pool.get().unwrap();

        let started = Instant::now();
        let result = pool.get_timeout(Some(Duration::from_millis(30)));
        assert!(matches!(result, Err(Error::TimedOut)));
        assert!(started.elapsed() >= Duration::from_millis(25));

        drop(borrowed);
        assert!(pool.get_timeout(Some(Duration::from_millis(30))).is_ok());
    }

    #[test]
    fn get_blocks_at_max_until_a_return() {
        let (pool, _) = counting_pool(1, 1);
        let borrowed = pool.get().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || *pool.get().unwrap())
        };

        thread::sleep(Duration::from_millis(20));
        drop(borrowed);

        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn discarded_resources_never_return() {
        let (pool, made) = counting_pool(2, 2);

        let mut borrowed = pool.get().unwrap();
        borrowed.discard_on_drop();
        drop(borrowed);

        assert_eq!(pool.available(), 0);
        assert_eq!(pool.size(), 0);

        // the next get creates a fresh resource
        assert_eq!(*pool.get().unwrap(), 1);
        assert_eq!(made.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detach_shrinks_the_pool() {
        let (pool, _) = counting_pool(1, 1);
        let value = pool.get().unwrap().detach();
        assert_eq!(value, 0);
        assert_eq!(pool.size(), 0);

        // room for a fresh resource again
        assert_eq!(*pool.get().unwrap(), 1);
    }
}
