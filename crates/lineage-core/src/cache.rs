//! Bounded key-value cache with per entry cost, per entry TTL and LRU eviction.
//!
//! Entries live in a slot arena and are chained in a doubly linked recency
//! list through slot indices: the head is the least recently used entry and
//! the next eviction candidate, the tail the most recently used one. Lookup,
//! insertion and removal are a hash lookup plus a list splice.
//!
//! A single mutex guards the map and the list. Reads take it too, since a
//! successful `get` moves the entry to the tail.
//!
//! Expiry is checked lazily: an expired entry is dropped by the `get` that
//! finds it, there is no background sweep.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, Weak},
    time::{Duration, Instant},
};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

/// Default time to live of a cache entry: one week.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Source of the current time used for TTL checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct BoundedCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    clock: Arc<dyn Clock>,
}

struct CacheInner<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    /// Sum of the entry costs. Wider than a cost so it cannot overflow.
    total_cost: u128,
    cost_limit: usize,
    count_limit: usize,
}

struct Entry<K, V> {
    key: K,
    value: V,
    cost: usize,
    /// `None` when the TTL overflows the clock, the entry never expires.
    expires_at: Option<Instant>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K, V> Entry<K, V> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `count_limit` entries whose costs sum
    /// to at most `cost_limit`.
    pub fn new(cost_limit: usize, count_limit: usize) -> Self {
        Self::with_clock(cost_limit, count_limit, Arc::new(SystemClock))
    }

    pub fn with_clock(cost_limit: usize, count_limit: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: None,
                tail: None,
                total_cost: 0,
                cost_limit,
                count_limit,
            }),
            clock,
        }
    }

    /// Insert `value` under `key`. Passing `None` removes the key.
    ///
    /// Replacing an existing key updates its value, cost and expiry. In both
    /// cases the entry becomes the most recently used one and the cache then
    /// evicts from the least recently used end until it fits its limits.
    pub fn put(&self, key: K, value: impl Into<Option<V>>, cost: usize, ttl: Duration) {
        let Some(value) = value.into() else {
            self.remove(&key);
            return;
        };
        let expires_at = self.clock.now().checked_add(ttl);

        let mut inner = self.inner.lock().unwrap();
        match inner.map.get(&key).copied() {
            Some(idx) => {
                inner.unlink(idx);
                let entry = inner.entry_mut(idx);
                let old_cost = std::mem::replace(&mut entry.cost, cost);
                entry.value = value;
                entry.expires_at = expires_at;
                inner.total_cost = inner.total_cost - old_cost as u128 + cost as u128;
                inner.push_back(idx);
            }
            None => {
                let idx = inner.alloc(Entry {
                    key: key.clone(),
                    value,
                    cost,
                    expires_at,
                    prev: None,
                    next: None,
                });
                inner.map.insert(key, idx);
                inner.total_cost += cost as u128;
                inner.push_back(idx);
            }
        }
        inner.evict();
    }

    /// Insert with zero cost and the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.put(key, value, 0, DEFAULT_TTL)
    }

    /// Fetch a value, marking it as the most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        let idx = *inner.map.get(key)?;
        if inner.entry(idx).is_expired(now) {
            inner.remove_slot(idx);
            return None;
        }
        inner.unlink(idx);
        inner.push_back(idx);
        Some(inner.entry(idx).value.clone())
    }

    /// Remove a value from the cache and return it.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let idx = *inner.map.get(key)?;
        Some(inner.remove_slot(idx).value)
    }

    /// Remove all values from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.slots.clear();
        inner.free.clear();
        inner.head = None;
        inner.tail = None;
        inner.total_cost = 0;
    }

    /// All values, from least to most recently used.
    pub fn values(&self) -> Vec<V> {
        let inner = self.inner.lock().unwrap();
        let mut values = Vec::with_capacity(inner.map.len());
        let mut next = inner.head;
        while let Some(idx) = next {
            let entry = inner.entry(idx);
            values.push(entry.value.clone());
            next = entry.next;
        }
        values
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the entry costs, saturated to `usize::MAX`.
    pub fn total_cost(&self) -> usize {
        usize::try_from(self.inner.lock().unwrap().total_cost).unwrap_or(usize::MAX)
    }

    pub fn cost_limit(&self) -> usize {
        self.inner.lock().unwrap().cost_limit
    }

    pub fn count_limit(&self) -> usize {
        self.inner.lock().unwrap().count_limit
    }

    /// Change the cost limit, evicting right away if the cache no longer fits.
    pub fn set_cost_limit(&self, cost_limit: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.cost_limit = cost_limit;
        inner.evict();
    }

    /// Change the count limit, evicting right away if the cache no longer fits.
    pub fn set_count_limit(&self, count_limit: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.count_limit = count_limit;
        inner.evict();
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Clear the cache every time `pressure` is signaled.
    ///
    /// The spawned task only holds a weak reference: it ends when the cache
    /// is dropped (at the next signal) or when every [`MemoryPressure`]
    /// handle is gone. Must be called from within a tokio runtime.
    pub fn watch_memory_pressure(self: &Arc<Self>, pressure: &MemoryPressure) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let mut rx = pressure.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => match cache.upgrade() {
                        Some(cache) => {
                            log::info!("memory pressure: clearing {} cache entries", cache.len());
                            cache.clear();
                        }
                        None => break,
                    },
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl<K, V> Default for BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(usize::MAX, usize::MAX)
    }
}

// Every method below must be called with the lock held.
impl<K: Hash + Eq, V> CacheInner<K, V> {
    fn entry(&self, idx: usize) -> &Entry<K, V> {
        self.slots[idx]
            .as_ref()
            .unwrap_or_else(|| panic!("cache slot {idx} is vacant"))
    }

    fn entry_mut(&mut self, idx: usize) -> &mut Entry<K, V> {
        self.slots[idx]
            .as_mut()
            .unwrap_or_else(|| panic!("cache slot {idx} is vacant"))
    }

    fn alloc(&mut self, entry: Entry<K, V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    /// Detach a slot from the recency list.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = self.entry_mut(idx);
            (entry.prev.take(), entry.next.take())
        };
        match prev {
            Some(prev) => self.entry_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.entry_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }

    /// Attach a detached slot at the most recently used end.
    fn push_back(&mut self, idx: usize) {
        let tail = self.tail;
        {
            let entry = self.entry_mut(idx);
            debug_assert!(entry.prev.is_none() && entry.next.is_none());
            entry.prev = tail;
        }
        match tail {
            Some(tail) => self.entry_mut(tail).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn remove_slot(&mut self, idx: usize) -> Entry<K, V> {
        self.unlink(idx);
        let entry = self.slots[idx]
            .take()
            .unwrap_or_else(|| panic!("cache slot {idx} is vacant"));
        self.free.push(idx);
        self.map.remove(&entry.key);
        self.total_cost -= entry.cost as u128;
        entry
    }

    fn evict(&mut self) {
        while self.total_cost > self.cost_limit as u128 || self.map.len() > self.count_limit {
            let Some(head) = self.head else { break };
            self.remove_slot(head);
        }
    }
}

/// Broadcast signal telling caches to drop everything they hold.
#[derive(Debug, Clone)]
pub struct MemoryPressure {
    tx: broadcast::Sender<()>,
}

impl MemoryPressure {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(4);
        Self { tx }
    }

    /// Signal memory pressure to every subscribed cache.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

impl Default for MemoryPressure {
    fn default() -> Self {
        Self::new()
    }
}
