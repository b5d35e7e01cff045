//! Range cache
//!
//! Maps a cache key to an aggregated payload with at most one computation
//! in flight per key. Each key owns a slot guarded by its own mutex and
//! condvar; the slot map is sharded, so requests for different keys never
//! contend on a single lock.
//!
//! Slot lifecycle: `absent -> computing -> present`, back to `absent` on
//! eviction, invalidation or a failed computation. Waiters only ever see the
//! computing state through their own blocking `get_or_compute` call.

use crate::config::CacheConfig;
use crate::error::{TrackError, TrackResult};
use crate::types::{ResolutionLevel, TileIndex, TrackKind, TrackPayload};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Size accounting for cached values
pub trait CacheWeight {
    fn weight(&self) -> usize;
}

impl CacheWeight for TrackPayload {
    fn weight(&self) -> usize {
        self.size_bytes()
    }
}

/// Identity of one cached tile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub sample_id: String,
    pub kind: TrackKind,
    pub chromosome: String,
    pub level: ResolutionLevel,
    pub tile: TileIndex,
}

impl CacheKey {
    pub fn new(
        sample_id: &str,
        kind: TrackKind,
        chromosome: &str,
        level: ResolutionLevel,
        tile: TileIndex,
    ) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            kind,
            chromosome: crate::coords::normalize_chromosome(chromosome),
            level,
            tile,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/L{}/T{}",
            self.sample_id, self.kind, self.chromosome, self.level, self.tile
        )
    }
}

enum SlotState<V> {
    Computing,
    Present(Arc<V>),
    Failed(TrackError),
    Abandoned,
}

enum WaitOutcome<V> {
    Ready { value: Arc<V>, waited: bool },
    Failed(TrackError),
    Abandoned,
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
    ready: Condvar,
    last_access: AtomicU64,
    size_bytes: AtomicUsize,
    created_at: DateTime<Utc>,
}

impl<V> Slot<V> {
    fn computing() -> Self {
        Self {
            state: Mutex::new(SlotState::Computing),
            ready: Condvar::new(),
            last_access: AtomicU64::new(0),
            size_bytes: AtomicUsize::new(0),
            created_at: Utc::now(),
        }
    }

    fn wait(&self) -> WaitOutcome<V> {
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            match &*state {
                SlotState::Computing => {
                    waited = true;
                    self.ready.wait(&mut state);
                }
                SlotState::Present(value) => {
                    return WaitOutcome::Ready {
                        value: Arc::clone(value),
                        waited,
                    }
                }
                SlotState::Failed(err) => return WaitOutcome::Failed(err.clone()),
                SlotState::Abandoned => return WaitOutcome::Abandoned,
            }
        }
    }

    fn finish(&self, next: SlotState<V>) {
        *self.state.lock() = next;
        self.ready.notify_all();
    }

    fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    /// Size of a present value, `None` while computing
    fn present_size(&self) -> Option<usize> {
        match &*self.state.lock() {
            SlotState::Present(_) => Some(self.size_bytes.load(Ordering::Relaxed)),
            _ => None,
        }
    }

    /// Last access tick of a present value nobody is reading
    fn eviction_candidate(&self) -> Option<u64> {
        match &*self.state.lock() {
            SlotState::Present(value) if Arc::strong_count(value) == 1 => {
                Some(self.last_access.load(Ordering::Relaxed))
            }
            _ => None,
        }
    }
}

/// Snapshot of one present cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntryInfo<K> {
    pub key: K,
    pub size_bytes: usize,
    pub last_access: u64,
    pub created_at: DateTime<Utc>,
}

/// Cache performance statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests that waited on another caller's computation
    pub coalesced: u64,
    pub evictions: u64,
    pub invalidated: u64,
    pub failures: u64,
    pub entries: usize,
    pub bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct EvictorSignal {
    pressure: bool,
    stop: bool,
}

/// Single-flight, byte-bounded LRU cache.
pub struct RangeCache<K, V> {
    slots: DashMap<K, Arc<Slot<V>>>,
    config: CacheConfig,
    clock: AtomicU64,
    total_bytes: AtomicUsize,

    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    invalidated: AtomicU64,
    failures: AtomicU64,

    evictor_running: AtomicBool,
    signal: Mutex<EvictorSignal>,
    signal_cv: Condvar,
}

/// Cache of aggregated track tiles
pub type TrackCache = RangeCache<CacheKey, TrackPayload>;

/// Clears a computing slot if its owner unwinds before finishing.
struct ComputeGuard<'a, K: Eq + Hash, V> {
    slots: &'a DashMap<K, Arc<Slot<V>>>,
    key: &'a K,
    slot: &'a Arc<Slot<V>>,
    armed: bool,
}

impl<K: Eq + Hash, V> Drop for ComputeGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.armed {
            self.slots
                .remove_if(self.key, |_, current| Arc::ptr_eq(current, self.slot));
            self.slot.finish(SlotState::Abandoned);
        }
    }
}

impl<K, V> RangeCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: CacheWeight + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: DashMap::new(),
            config,
            clock: AtomicU64::new(0),
            total_bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evictor_running: AtomicBool::new(false),
            signal: Mutex::new(EvictorSignal::default()),
            signal_cv: Condvar::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Return the cached value for `key`, computing it if absent.
    ///
    /// Concurrent callers for the same key share one computation and receive
    /// the same `Arc`. A failed computation is returned to every waiter and
    /// nothing is cached, so the next request computes again.
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> TrackResult<Arc<V>>
    where
        F: FnOnce() -> TrackResult<V>,
    {
        let mut compute = Some(compute);
        loop {
            let (slot, owner) = match self.slots.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let slot = Arc::new(Slot::computing());
                    entry.insert(Arc::clone(&slot));
                    (slot, true)
                }
            };

            if owner {
                self.misses.fetch_add(1, Ordering::Relaxed);
                log::debug!("Cache miss for {:?}", key);
                let compute = compute.take().ok_or_else(|| TrackError::Abandoned {
                    key: format!("{:?}", key),
                })?;
                return self.compute_into(&key, &slot, compute);
            }

            match slot.wait() {
                WaitOutcome::Ready { value, waited } => {
                    if waited {
                        self.coalesced.fetch_add(1, Ordering::Relaxed);
                        log::trace!("Joined in-flight computation for {:?}", key);
                    } else {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        log::trace!("Cache hit for {:?}", key);
                    }
                    slot.touch(self.tick());
                    return Ok(value);
                }
                WaitOutcome::Failed(err) => return Err(err),
                WaitOutcome::Abandoned => {
                    log::debug!("Computation for {:?} was abandoned, retrying", key);
                }
            }
        }
    }

    fn compute_into<F>(&self, key: &K, slot: &Arc<Slot<V>>, compute: F) -> TrackResult<Arc<V>>
    where
        F: FnOnce() -> TrackResult<V>,
    {
        let mut guard = ComputeGuard {
            slots: &self.slots,
            key,
            slot,
            armed: true,
        };
        let result = compute();
        guard.armed = false;

        match result {
            Ok(value) => {
                let value = Arc::new(value);
                let size = value.weight();
                let stored = match self.slots.get(key) {
                    Some(current) if Arc::ptr_eq(current.value(), slot) => {
                        slot.size_bytes.store(size, Ordering::Relaxed);
                        slot.touch(self.tick());
                        slot.finish(SlotState::Present(Arc::clone(&value)));
                        self.total_bytes.fetch_add(size, Ordering::Relaxed);
                        true
                    }
                    _ => false,
                };
                if stored {
                    self.relieve_pressure();
                } else {
                    // Invalidated while computing: hand the value to the
                    // waiters but keep it out of the cache.
                    slot.finish(SlotState::Present(Arc::clone(&value)));
                    log::debug!("Result for {:?} not stored, key was invalidated", key);
                }
                Ok(value)
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.slots
                    .remove_if(key, |_, current| Arc::ptr_eq(current, slot));
                slot.finish(SlotState::Failed(err.clone()));
                log::warn!("Computation for {:?} failed: {}", key, err);
                Err(err)
            }
        }
    }

    fn relieve_pressure(&self) {
        if self.total_bytes.load(Ordering::Relaxed) <= self.config.max_bytes {
            return;
        }
        if self.evictor_running.load(Ordering::Acquire) {
            self.signal.lock().pressure = true;
            self.signal_cv.notify_one();
        } else {
            self.enforce_budget();
        }
    }

    /// Evict least recently used entries until the byte budget holds.
    ///
    /// Entries being computed or currently referenced by a reader are skipped.
    /// Returns the number of evicted entries.
    pub fn enforce_budget(&self) -> usize {
        let budget = self.config.max_bytes;
        if self.total_bytes.load(Ordering::Relaxed) <= budget {
            return 0;
        }

        let mut candidates: Vec<(u64, K)> = self
            .slots
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .eviction_candidate()
                    .map(|tick| (tick, entry.key().clone()))
            })
            .collect();
        candidates.sort_by_key(|(tick, _)| *tick);

        let mut evicted = 0;
        for (tick, key) in candidates {
            if self.total_bytes.load(Ordering::Relaxed) <= budget {
                break;
            }
            let removed = self.slots.remove_if(&key, |_, slot| {
                slot.eviction_candidate() == Some(tick)
            });
            if let Some((_, slot)) = removed {
                let size = slot.size_bytes.load(Ordering::Relaxed);
                self.total_bytes.fetch_sub(size, Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            log::debug!(
                "Evicted {} entries, {} bytes cached",
                evicted,
                self.total_bytes.load(Ordering::Relaxed)
            );
        }
        evicted
    }

    /// Remove every entry whose key matches `predicate`.
    ///
    /// Computations in flight for a matching key still complete for their
    /// waiters but are not stored. Returns the number of removed entries.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let mut removed = 0usize;
        let mut freed = 0usize;
        self.slots.retain(|key, slot| {
            if !predicate(key) {
                return true;
            }
            if let Some(size) = slot.present_size() {
                freed += size;
            }
            removed += 1;
            false
        });
        if removed > 0 {
            self.total_bytes.fetch_sub(freed, Ordering::Relaxed);
            self.invalidated.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) -> usize {
        self.invalidate_where(|_| true)
    }

    /// True when a computed value for `key` is cached
    pub fn contains(&self, key: &K) -> bool {
        self.slots
            .get(key)
            .and_then(|slot| slot.present_size())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().present_size().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn entries(&self) -> Vec<CacheEntryInfo<K>> {
        self.slots
            .iter()
            .filter_map(|entry| {
                let slot = entry.value();
                slot.present_size().map(|size_bytes| CacheEntryInfo {
                    key: entry.key().clone(),
                    size_bytes,
                    last_access: slot.last_access.load(Ordering::Relaxed),
                    created_at: slot.created_at,
                })
            })
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.len(),
            bytes: self.total_bytes(),
        }
    }

    /// Start a background thread that enforces the byte budget.
    ///
    /// It wakes when an insert pushes the cache over budget and at the
    /// configured interval. Dropping the returned handle stops it.
    pub fn spawn_evictor(self: &Arc<Self>) -> TrackResult<Evictor<K, V>> {
        if self.evictor_running.swap(true, Ordering::AcqRel) {
            return Err(TrackError::config("An evictor is already running for this cache"));
        }
        self.signal.lock().stop = false;
        let cache = Arc::clone(self);
        let interval = Duration::from_millis(self.config.eviction_interval_ms.max(1));
        let handle = std::thread::Builder::new()
            .name("gens-cache-evictor".to_string())
            .spawn(move || cache.run_evictor(interval))
            .map_err(|e| {
                self.evictor_running.store(false, Ordering::Release);
                TrackError::config(format!("Failed to spawn evictor thread: {}", e))
            })?;
        log::info!("Started background cache evictor ({:?} interval)", interval);
        Ok(Evictor {
            cache: Arc::clone(self),
            handle: Some(handle),
        })
    }

    fn run_evictor(&self, interval: Duration) {
        loop {
            {
                let mut signal = self.signal.lock();
                if !signal.pressure && !signal.stop {
                    self.signal_cv.wait_for(&mut signal, interval);
                }
                if signal.stop {
                    break;
                }
                signal.pressure = false;
            }
            self.enforce_budget();
        }
        log::debug!("Cache evictor stopped");
    }

    fn stop_evictor(&self) {
        self.signal.lock().stop = true;
        self.signal_cv.notify_all();
    }
}

impl<V> RangeCache<CacheKey, V>
where
    V: CacheWeight + Send + Sync + 'static,
{
    /// Drop all tiles of a sample's track, optionally on one chromosome only.
    pub fn invalidate(&self, sample_id: &str, kind: TrackKind, chromosome: Option<&str>) -> usize {
        let chromosome = chromosome.map(crate::coords::normalize_chromosome);
        let removed = self.invalidate_where(|key| {
            key.sample_id == sample_id
                && key.kind == kind
                && chromosome.as_ref().map_or(true, |c| &key.chromosome == c)
        });
        log::info!(
            "Invalidated {} cached tiles for {} {}{}",
            removed,
            sample_id,
            kind,
            chromosome.map(|c| format!(" on {}", c)).unwrap_or_default()
        );
        removed
    }
}

/// Handle to a running background evictor
pub struct Evictor<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: CacheWeight + Send + Sync + 'static,
{
    cache: Arc<RangeCache<K, V>>,
    handle: Option<JoinHandle<()>>,
}

impl<K, V> Evictor<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: CacheWeight + Send + Sync + 'static,
{
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cache.stop_evictor();
            if handle.join().is_err() {
                log::error!("Cache evictor thread panicked");
            }
            self.cache.evictor_running.store(false, Ordering::Release);
        }
    }
}

impl<K, V> Drop for Evictor<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: CacheWeight + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
