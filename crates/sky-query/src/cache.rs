//! Bounded least-recently-used cache of compiled plans.
//!
//! Entries live in a `Vec` and are threaded into a recency list by index,
//! so lookups, promotions and evictions are all O(1).

use std::collections::HashMap;
use std::hash::Hash;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// An LRU map. Not synchronized; the engine wraps it in a mutex.
pub(crate) struct LruCache<K, V> {
    map: HashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries. A capacity of
    /// zero stores nothing.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the value for `key` and marks it most recently used.
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        Some(&self.entries[idx].value)
    }

    /// Inserts or replaces `key`, evicting the least recently used entry
    /// when full. Returns the evicted key, if any.
    pub(crate) fn put(&mut self, key: K, value: V) -> Option<K> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(&idx) = self.map.get(&key) {
            self.entries[idx].value = value;
            self.move_to_front(idx);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        let idx = self.entries.len();
        self.entries.push(Entry {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        });
        if let Some(old_head) = self.head {
            self.entries[old_head].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.map.insert(key, idx);
        evicted
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

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.entries[idx].next = self.head;
        if let Some(old_head) = self.head {
            self.entries[old_head].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Removes the tail entry, moving the last slot into its place.
    fn evict_lru(&mut self) -> Option<K> {
        let idx = self.tail?;
        self.unlink(idx);
        let entry = self.entries.swap_remove(idx);
        self.map.remove(&entry.key);

        if idx < self.entries.len() {
            let moved = &self.entries[idx];
            self.map.insert(moved.key.clone(), idx);
            let (prev, next) = (moved.prev, moved.next);
            match prev {
                Some(p) => self.entries[p].next = Some(idx),
                None => self.head = Some(idx),
            }
            match next {
                Some(n) => self.entries[n].prev = Some(idx),
                None => self.tail = Some(idx),
            }
        }
        Some(entry.key)
    }
}
