use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Result;

/// why an entry left the cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictReason {
    /// pushed out by the byte or count bound
    Lru,
    /// expired
    Ttl,
    /// removed by the caller
    Manual,
    /// the whole cache was cleared
    Clear,
}

type Callback = Box<dyn FnMut(&str, u64, EvictReason) + Send>;

const NIL: usize = usize::MAX;

struct Entry<V> {
    key: String,
    value: V,
    bytes: u64,
    expires_at: Option<Instant>,
    prev: usize,
    next: usize,
}

/// bytes+count bounded LRU cache with optional TTL
///
/// a hash map indexes into a slab whose entries are linked in recency
/// order, so get/put/remove are O(1). entries carry their own byte cost.
pub struct LruCache<V> {
    map: HashMap<String, usize>,
    slab: Vec<Option<Entry<V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    max_count: usize,
    max_bytes: u64,
    ttl: Option<Duration>,
    bytes: u64,
    callback: Option<Callback>,
}

impl<V> LruCache<V> {
    pub fn new(max_count: usize, max_bytes: u64, ttl: Option<Duration>) -> Self {
        Self {
            map: HashMap::new(),
            slab: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            max_count: max_count.max(1),
            max_bytes,
            ttl,
            bytes: 0,
            callback: None,
        }
    }

    /// register an eviction callback `(key, bytes, reason)`
    pub fn on_evict(&mut self, callback: impl FnMut(&str, u64, EvictReason) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// current byte cost of all entries
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// get and promote to most-recent; expired entries are evicted
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.map.get(key)?;
        if self.is_expired(idx) {
            self.evict(idx, EvictReason::Ttl);
            return None;
        }
        self.unlink(idx);
        self.push_front(idx);
        self.slab[idx].as_ref().map(|e| &e.value)
    }

    /// get without promoting; expired entries read as absent
    pub fn peek(&self, key: &str) -> Option<&V> {
        let idx = *self.map.get(key)?;
        if self.is_expired(idx) {
            return None;
        }
        self.slab[idx].as_ref().map(|e| &e.value)
    }

    /// insert or replace, then evict until within bounds
    pub fn put(&mut self, key: impl Into<String>, value: V, bytes: u64) {
        let key = key.into();
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);

        if let Some(&idx) = self.map.get(&key) {
            // replace in place and promote
            let entry = self.slab[idx].as_mut().unwrap();
            self.bytes = self.bytes - entry.bytes + bytes;
            entry.value = value;
            entry.bytes = bytes;
            entry.expires_at = expires_at;
            self.unlink(idx);
            self.push_front(idx);
        } else {
            let idx = self.alloc(Entry {
                key: key.clone(),
                value,
                bytes,
                expires_at,
                prev: NIL,
                next: NIL,
            });
            self.map.insert(key, idx);
            self.bytes += bytes;
            self.push_front(idx);
        }

        self.enforce_bounds();
    }

    /// remove an entry, firing the callback with `Manual`
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.take(idx, EvictReason::Manual)
    }

    /// drop every entry, firing the callback with `Clear`
    pub fn clear(&mut self) {
        while self.tail != NIL {
            self.take(self.tail, EvictReason::Clear);
        }
    }

    /// sweep expired entries, firing the callback with `Ttl`
    pub fn purge_expired(&mut self) -> usize {
        let expired: Vec<usize> = self
            .map
            .values()
            .copied()
            .filter(|&idx| self.is_expired(idx))
            .collect();
        let count = expired.len();
        for idx in expired {
            self.evict(idx, EvictReason::Ttl);
        }
        count
    }

    fn enforce_bounds(&mut self) {
        while self.map.len() > self.max_count || (self.bytes > self.max_bytes && self.tail != NIL) {
            let tail = self.tail;
            if tail == NIL {
                break;
            }
            self.evict(tail, EvictReason::Lru);
        }
    }

    fn is_expired(&self, idx: usize) -> bool {
        match self.slab[idx].as_ref().and_then(|e| e.expires_at) {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    fn evict(&mut self, idx: usize, reason: EvictReason) {
        self.take(idx, reason);
    }

    fn take(&mut self, idx: usize, reason: EvictReason) -> Option<V> {
        self.unlink(idx);
        let entry = self.slab[idx].take()?;
        self.map.remove(&entry.key);
        self.free.push(idx);
        self.bytes -= entry.bytes;
        if let Some(callback) = &mut self.callback {
            callback(&entry.key, entry.bytes, reason);
        }
        Some(entry.value)
    }

    fn alloc(&mut self, entry: Entry<V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slab[idx] = Some(entry);
            idx
        } else {
            self.slab.push(Some(entry));
            self.slab.len() - 1
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = self.slab[idx].as_ref().unwrap();
            (entry.prev, entry.next)
        };
        if prev != NIL {
            self.slab[prev].as_mut().unwrap().next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NIL {
            self.slab[next].as_mut().unwrap().prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
        let entry = self.slab[idx].as_mut().unwrap();
        entry.prev = NIL;
        entry.next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let entry = self.slab[idx].as_mut().unwrap();
            entry.prev = NIL;
            entry.next = old_head;
        }
        if old_head != NIL {
            self.slab[old_head].as_mut().unwrap().prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}

/// convenience for fallible fill-through
impl<V: Clone> LruCache<V> {
    /// get, or compute+insert on miss
    pub fn get_or_insert_with(
        &mut self,
        key: &str,
        bytes_of: impl Fn(&V) -> u64,
        fill: impl FnOnce() -> Result<V>,
    ) -> Result<V> {
        if let Some(value) = self.get(key) {
            return Ok(value.clone());
        }
        let value = fill()?;
        self.put(key, value.clone(), bytes_of(&value));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_get_put_promote() {
        let mut cache: LruCache<u32> = LruCache::new(2, 1000, None);
        cache.put("a", 1, 10);
        cache.put("b", 2, 10);

        // touch "a" so "b" becomes least-recent
        assert_eq!(cache.get("a"), Some(&1));
        cache.put("c", 3, 10);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("c"), Some(&3));
    }

    #[test]
    fn test_peek_does_not_promote() {
        let mut cache: LruCache<u32> = LruCache::new(2, 1000, None);
        cache.put("a", 1, 10);
        cache.put("b", 2, 10);

        assert_eq!(cache.peek("a"), Some(&1));
        cache.put("c", 3, 10);

        // "a" was not promoted by peek, so it was the lru victim
        assert_eq!(cache.peek("a"), None);
        assert_eq!(cache.peek("b"), Some(&2));
    }

    #[test]
    fn test_byte_bound_eviction() {
        let mut cache: LruCache<u32> = LruCache::new(100, 25, None);
        cache.put("a", 1, 10);
        cache.put("b", 2, 10);
        cache.put("c", 3, 10);

        // 30 bytes > 25: "a" evicted
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.bytes(), 20);
        assert_eq!(cache.peek("a"), None);
    }

    #[test]
    fn test_replace_updates_bytes() {
        let mut cache: LruCache<u32> = LruCache::new(10, 1000, None);
        cache.put("a", 1, 10);
        cache.put("a", 2, 30);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 30);
        assert_eq!(cache.get("a"), Some(&2));
    }

    #[test]
    fn test_eviction_callback_reasons() {
        let reasons = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = reasons.clone();

        let mut cache: LruCache<u32> = LruCache::new(1, 1000, None);
        cache.on_evict(move |key, _bytes, reason| {
            seen.lock().unwrap().push((key.to_string(), reason));
        });

        cache.put("a", 1, 1);
        cache.put("b", 2, 1); // evicts "a" (lru)
        cache.remove("b"); // manual
        cache.put("c", 3, 1);
        cache.clear(); // clear

        let log = reasons.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                ("a".to_string(), EvictReason::Lru),
                ("b".to_string(), EvictReason::Manual),
                ("c".to_string(), EvictReason::Clear),
            ]
        );
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache: LruCache<u32> = LruCache::new(10, 1000, Some(Duration::ZERO));
        cache.put("a", 1, 1);

        // zero ttl: expired as soon as it lands
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let mut cache: LruCache<u32> = LruCache::new(10, 1000, Some(Duration::ZERO));
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);

        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_no_ttl_entries_never_expire() {
        let mut cache: LruCache<u32> = LruCache::new(10, 1000, None);
        cache.put("a", 1, 1);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.get("a"), Some(&1));
    }

    #[test]
    fn test_get_or_insert_with() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut cache: LruCache<Vec<u8>> = LruCache::new(10, 1000, None);

        for _ in 0..3 {
            let calls = calls.clone();
            let value = cache
                .get_or_insert_with(
                    "k",
                    |v| v.len() as u64,
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(vec![1, 2, 3])
                    },
                )
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slab_reuse_after_heavy_churn() {
        let mut cache: LruCache<u64> = LruCache::new(4, u64::MAX, None);
        for i in 0..100u64 {
            cache.put(format!("k{i}"), i, 1);
        }
        assert_eq!(cache.len(), 4);
        // slab stayed bounded by max_count + free list reuse
        assert!(cache.slab.len() <= 5);
    }
}
