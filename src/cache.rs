//! A bounded associative cache using the SIEVE eviction algorithm.
//!
//! SIEVE keeps one visited bit per entry and a hand that walks from the
//! oldest entry towards the newest on eviction, clearing visited bits as it
//! goes and evicting the first clear entry it meets. Hits only set an atomic
//! bit, so lookups take the shared lock.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use slab::Slab;

const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    visited: AtomicBool,
    // towards newer
    prev: usize,
    // towards older
    next: usize,
}

struct Inner<K, V> {
    capacity: usize,
    lookup: HashMap<K, usize>,
    entries: Slab<Entry<K, V>>,
    head: usize,
    tail: usize,
    hand: usize,
}

/// A bounded key→value cache with O(1) SIEVE eviction.
///
/// The capacity is a hard bound: inserting into a full cache evicts exactly
/// one entry first.
pub struct SieveCache<K, V> {
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> SieveCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// A cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");

        SieveCache {
            inner: RwLock::new(Inner {
                capacity,
                lookup: HashMap::with_capacity(capacity),
                entries: Slab::with_capacity(capacity),
                head: NIL,
                tail: NIL,
                hand: NIL,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<K, V>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<K, V>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Looks `key` up, marking the entry visited on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.read();
        let &index = inner.lookup.get(key)?;
        let entry = &inner.entries[index];
        entry.visited.store(true, Ordering::Release);
        Some(entry.value.clone())
    }

    /// Inserts or replaces `key`. Inserting a new key into a full cache
    /// evicts exactly one entry.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.write();

        let existing = inner.lookup.get(&key).copied();
        if let Some(index) = existing {
            let entry = &mut inner.entries[index];
            entry.value = value;
            entry.visited.store(true, Ordering::Release);
            return;
        }

        if inner.entries.len() >= inner.capacity {
            inner.evict();
        }
        inner.push_front(key, value);
    }

    /// Fetches `key`, computing and inserting the value on a miss.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }

        let value = make(&key);
        self.insert(key, value.clone());
        value
    }

    /// Removes `key`, reporting whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.write();
        let Some(index) = inner.lookup.remove(key) else {
            return false;
        };

        let prev = inner.entries[index].prev;
        if inner.hand == index {
            inner.hand = prev;
        }
        inner.unlink(index);
        inner.entries.remove(index);
        true
    }

    /// Whether `key` is present; does not mark the entry visited.
    pub fn contains(&self, key: &K) -> bool {
        self.read().lookup.contains_key(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.lookup.clear();
        inner.entries.clear();
        inner.head = NIL;
        inner.tail = NIL;
        inner.hand = NIL;
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
{
    fn push_front(&mut self, key: K, value: V) {
        let old_head = self.head;
        let index = self.entries.insert(Entry {
            key: key.clone(),
            value,
            visited: AtomicBool::new(false),
            prev: NIL,
            next: old_head,
        });

        if old_head != NIL {
            self.entries[old_head].prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }

        self.lookup.insert(key, index);
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let entry = &self.entries[index];
            (entry.prev, entry.next)
        };

        if prev != NIL {
            self.entries[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.entries[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    // The hand starts at the oldest entry (or where it last stopped), clears
    // visited bits while moving towards the newest, wraps to the oldest, and
    // evicts the first clear entry.
    fn evict(&mut self) {
        let mut index = if self.hand == NIL { self.tail } else { self.hand };
        if index == NIL {
            return;
        }

        while self.entries[index].visited.swap(false, Ordering::Acquire) {
            let prev = self.entries[index].prev;
            index = if prev == NIL { self.tail } else { prev };
        }

        self.hand = self.entries[index].prev;
        let key = self.entries[index].key.clone();
        self.lookup.remove(&key);
        self.unlink(index);
        self.entries.remove(index);
    }
}

impl<K, V> fmt::Debug for SieveCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SieveCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visited_entries_survive_the_hand() {
        let cache = SieveCache::new(3);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        // mark b visited, then overflow
        assert_eq!(cache.get(&"b"), Some(2));
        cache.insert("d", 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"d"));
        // the hand hit the oldest unvisited entry first
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn capacity_is_a_hard_bound() {
        let cache = SieveCache::new(4);
        for i in 0..64 {
            cache.insert(i, i * 10);
            assert!(cache.len() <= 4);
        }
    }

    #[test]
    fn updates_do_not_grow_the_cache() {
        let cache = SieveCache::new(2);
        cache.insert("k", 1);
        cache.insert("k", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[test]
    fn get_or_insert_with_computes_once() {
        let cache = SieveCache::new(2);
        let mut calls = 0;
        let value = cache.get_or_insert_with("k", |_| {
            calls += 1;
            7
        });
        assert_eq!(value, 7);

        let value = cache.get_or_insert_with("k", |_| {
            calls += 1;
            9
        });
        assert_eq!(value, 7);
        assert_eq!(calls, 1);
    }

    #[test]
    fn remove_and_clear() {
        let cache = SieveCache::new(3);
        cache.insert(1, "one");
        cache.insert(2, "two");

        assert!(cache.remove(&1));
        assert!(!cache.remove(&1));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn all_visited_entries_wrap_and_evict() {
        let cache = SieveCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get(&"a");
        cache.get(&"b");

        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&"c"));
    }
}
