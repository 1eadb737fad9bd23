//! A lifetime anchor for fire-and-forget tasks.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use slab::Slab;

use super::scheduler::Scheduler;
use super::task::JoinHandle;

struct GroupState {
    // slot array and free list in one; finished slots are reaped lazily
    slots: Slab<JoinHandle<()>>,
    pending: Vec<usize>,
    live: usize,
}

struct GroupShared {
    state: Mutex<GroupState>,
    // signalled by the last live task finishing
    done: Condvar,
}

impl GroupShared {
    fn lock(&self) -> MutexGuard<'_, GroupState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// Runs when a task's frame finishes or is destroyed; either way the slot is
// ready for reaping and the task no longer counts as live.
struct GroupGuard {
    shared: Arc<GroupShared>,
    key: usize,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.pending.push(self.key);
        state.live -= 1;
        if state.live == 0 {
            self.shared.done.notify_all();
        }
    }
}

/// Keeps task storage alive until each task completes.
///
/// Tasks started through a group are fire-and-forget: the group holds their
/// handles, reclaims finished slots on [`collect_garbage`], and its drop
/// blocks until every live task has finished.
///
/// Invariant: live slots + slots awaiting deletion + free slots add up to the
/// group's capacity, and no slot is both pending and free.
///
/// [`collect_garbage`]: TaskGroup::collect_garbage
pub struct TaskGroup {
    shared: Arc<GroupShared>,
}

impl TaskGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::with_capacity(8)
    }

    /// An empty group with room for `capacity` tasks before growing.
    pub fn with_capacity(capacity: usize) -> Self {
        TaskGroup {
            shared: Arc::new(GroupShared {
                state: Mutex::new(GroupState {
                    slots: Slab::with_capacity(capacity),
                    pending: Vec::new(),
                    live: 0,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Attaches `future` to the group and starts it on `scheduler`.
    ///
    /// Finished slots are reaped before the new task is inserted.
    pub fn start<F>(&self, scheduler: &Scheduler, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.shared.lock();
        reap(&mut state);

        let entry = state.slots.vacant_entry();
        let key = entry.key();

        let guard = GroupGuard {
            shared: Arc::clone(&self.shared),
            key,
        };
        let handle = scheduler.spawn(async move {
            let _guard = guard;
            future.await;
        });

        entry.insert(handle);
        state.live += 1;
    }

    /// Reclaims the slots of finished tasks; returns how many were freed.
    pub fn collect_garbage(&self) -> usize {
        reap(&mut self.shared.lock())
    }

    /// Number of live (unfinished) tasks.
    pub fn len(&self) -> usize {
        self.shared.lock().live
    }

    /// Whether no tasks are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finished tasks whose slots have not been reclaimed yet.
    pub fn pending_deletion(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Current slot capacity; grows by doubling as tasks are added.
    pub fn capacity(&self) -> usize {
        self.shared.lock().slots.capacity()
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskGroup {
    /// Blocks until every live task has finished, then reclaims all slots.
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        while state.live > 0 {
            state = match self.shared.done.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        reap(&mut state);
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("TaskGroup")
            .field("live", &state.live)
            .field("pending_deletion", &state.pending.len())
            .finish()
    }
}

fn reap(state: &mut GroupState) -> usize {
    let reaped = state.pending.len();
    for key in std::mem::take(&mut state.pending) {
        if state.slots.contains(key) {
            state.slots.remove(key);
        }
    }
    reaped
}
