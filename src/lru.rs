//! Fixed-capacity least-recently-used cache.

use core::hash::Hash;
use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashMap;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Map plus doubly linked recency list. Entries live in a slab and link by index; the head is
/// the most recently used entry, the tail is evicted first.
#[derive(Debug)]
pub struct LruCache<K, V> {
    map: FxHashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            entries: Vec::with_capacity(capacity.min(1024)),
            head: None,
            tail: None,
            capacity,
        }
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        Some(&self.entries[idx].value)
    }

    /// Insert or replace `key`. When full, the least recently used entry makes room.
    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(&idx) = self.map.get(&key) {
            self.entries[idx].value = value;
            self.move_to_front(idx);
            return;
        }

        let idx = if self.entries.len() < self.capacity {
            self.entries.push(Entry {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.entries.len() - 1
        } else {
            // Reuse the tail's slot.
            let Some(idx) = self.tail else {
                return;
            };
            self.unlink(idx);
            let old = core::mem::replace(
                &mut self.entries[idx],
                Entry {
                    key: key.clone(),
                    value,
                    prev: None,
                    next: None,
                },
            );
            self.map.remove(&old.key);
            idx
        };
        self.map.insert(key, idx);
        self.push_front(idx);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// No entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.map.clear();
        self.entries.clear();
        self.head = None;
        self.tail = None;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.entries[idx].prev, self.entries[idx].next);
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
        self.entries[idx].prev = None;
        self.entries[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.entries[idx].next = self.head;
        self.entries[idx].prev = None;
        if let Some(h) = self.head {
            self.entries[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

/// [`LruCache`] behind a mutex, shareable across threads.
#[derive(Debug)]
pub struct SyncLruCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> SyncLruCache<K, V> {
    /// Empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Clone of the cached value, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Insert or replace.
    pub fn put(&self, key: K, value: V) {
        self.lock().put(key, value);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// No entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
