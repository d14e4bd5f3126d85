//! Bounded LRU cache for decoded region tiles.
//!
//! The cache enforces two independent ceilings, a maximum number of entries
//! and a maximum summed byte estimate, and evicts least-recently-used entries
//! after every insertion until both hold again.
//!
//! # Oversize Tiles
//!
//! The entry that was just inserted is never evicted by its own insertion. A
//! single tile larger than the byte budget is therefore kept on its own and
//! the cache runs over budget until that tile is pushed out by later
//! insertions or removed by invalidation.
//!
//! # Locking
//!
//! Every operation runs under one mutex scoped to the cache instance. The
//! eviction loop executes in the same critical section as the insertion that
//! triggered it, so counters always equal the sum over live entries once a
//! call returns.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use tracing::{debug, warn};

use crate::error::CacheError;

use super::estimator::SizeEstimator;
use super::key::RegionKey;
use super::stats::CacheStats;

/// Assumed tile footprint for the entry-count heuristic: 256x256 RGBA.
const NOMINAL_TILE_BYTES: usize = 256 * 256 * 4;

/// Lower bound for the heuristic entry ceiling.
const MIN_DEFAULT_ENTRIES: usize = 200;

/// Entry ceiling to use when only a byte budget is known.
///
/// Assumes roughly 256x256 four-byte tiles, with a floor of 200 entries.
pub fn default_max_entries(max_bytes: usize) -> usize {
    (max_bytes / NOMINAL_TILE_BYTES + 10).max(MIN_DEFAULT_ENTRIES)
}

// =============================================================================
// Entries
// =============================================================================

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// A tile is cached for the key
    Tile(V),

    /// The key is cached as decoding to nothing
    Empty,

    /// Nothing is cached for the key
    Miss,
}

impl<V> Lookup<V> {
    pub fn is_hit(&self) -> bool {
        !matches!(self, Lookup::Miss)
    }

    /// The cached tile, if any.
    pub fn into_tile(self) -> Option<V> {
        match self {
            Lookup::Tile(tile) => Some(tile),
            Lookup::Empty | Lookup::Miss => None,
        }
    }
}

struct CacheEntry<V> {
    tile: Option<V>,

    /// Bytes charged when the entry was inserted
    size: usize,
}

struct CacheState<V> {
    entries: LruCache<RegionKey, CacheEntry<V>>,
    current_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            current_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            invalidations: 0,
        }
    }

    fn release(&mut self, entry: &CacheEntry<V>) {
        debug_assert!(self.current_bytes >= entry.size);
        self.current_bytes = self.current_bytes.saturating_sub(entry.size);
    }

    /// Remove every entry whose key matches, returning how many were removed.
    fn remove_matching(&mut self, mut predicate: impl FnMut(&RegionKey) -> bool) -> usize {
        let doomed: Vec<RegionKey> = self
            .entries
            .iter()
            .filter(|(key, _)| predicate(*key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            if let Some(entry) = self.entries.pop(key) {
                self.release(&entry);
            }
        }

        self.invalidations += doomed.len() as u64;
        doomed.len()
    }
}

// =============================================================================
// Region Cache
// =============================================================================

/// Thread-safe LRU cache from [`RegionKey`] to decoded tiles, bounded by both
/// entry count and estimated memory.
///
/// Share it between decode workers and source-lifecycle handlers through an
/// `Arc`. Tiles are returned by clone, so `V` is typically an `Arc` around the
/// decoded raster or a cheaply cloned buffer.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use image::{DynamicImage, RgbaImage};
/// use wsi_region_cache::{ImageSizeEstimator, RegionCache, RegionKey};
///
/// let cache = RegionCache::with_byte_budget(ImageSizeEstimator, 64 * 1024 * 1024);
///
/// let key = RegionKey::new("slides/sample.svs", 0, 0, 256, 256);
/// let tile = Arc::new(DynamicImage::ImageRgba8(RgbaImage::new(256, 256)));
///
/// cache.put(key.clone(), tile).unwrap();
/// assert!(cache.get(&key).unwrap().is_some());
/// assert_eq!(cache.current_bytes().unwrap(), 256 * 256 * 4);
///
/// // Closing the slide drops all of its tiles
/// cache.remove_for_source("slides/sample.svs").unwrap();
/// assert!(cache.is_empty().unwrap());
/// ```
pub struct RegionCache<V> {
    state: Mutex<CacheState<V>>,
    estimator: Box<dyn SizeEstimator<V>>,
    max_entries: usize,
    max_bytes: usize,
}

impl<V: Clone> RegionCache<V> {
    /// Create an empty cache with explicit entry and byte ceilings.
    ///
    /// At least one entry is always retained, even with `max_entries == 0`.
    pub fn new(
        estimator: impl SizeEstimator<V> + 'static,
        max_entries: usize,
        max_bytes: usize,
    ) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            estimator: Box::new(estimator),
            max_entries,
            max_bytes,
        }
    }

    /// Create an empty cache from a byte budget alone.
    ///
    /// The entry ceiling comes from [`default_max_entries`].
    pub fn with_byte_budget(estimator: impl SizeEstimator<V> + 'static, max_bytes: usize) -> Self {
        Self::new(estimator, default_max_entries(max_bytes), max_bytes)
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, CacheState<V>>, CacheError> {
        self.state
            .lock()
            .map_err(|_| CacheError::LockPoisoned { operation })
    }

    /// Look up a key, distinguishing cached-empty entries from misses.
    ///
    /// A hit marks the entry as most recently used. Never evicts.
    pub fn lookup(&self, key: &RegionKey) -> Result<Lookup<V>, CacheError> {
        let mut state = self.lock("lookup")?;

        let lookup = match state.entries.get(key) {
            Some(CacheEntry { tile: Some(tile), .. }) => Lookup::Tile(tile.clone()),
            Some(CacheEntry { tile: None, .. }) => Lookup::Empty,
            None => Lookup::Miss,
        };

        if lookup.is_hit() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }

        Ok(lookup)
    }

    /// Get a cached tile.
    ///
    /// Returns `None` on a miss and for keys cached as empty; use
    /// [`contains_key`](Self::contains_key) or [`lookup`](Self::lookup) to
    /// tell them apart. A hit marks the entry as most recently used.
    pub fn get(&self, key: &RegionKey) -> Result<Option<V>, CacheError> {
        self.lookup(key).map(Lookup::into_tile)
    }

    /// Store a tile, returning the tile previously cached for the key.
    ///
    /// Least-recently-used entries are evicted afterwards until both ceilings
    /// hold, except that the new entry itself is never evicted.
    pub fn put(&self, key: RegionKey, tile: V) -> Result<Option<V>, CacheError> {
        // Estimated outside the lock so a panicking estimator cannot poison it
        let size = self.estimator.estimate(&tile);
        self.insert(key, Some(tile), size)
    }

    /// Record that a key decodes to nothing.
    ///
    /// The entry costs 0 bytes but occupies a slot against the entry ceiling.
    pub fn put_empty(&self, key: RegionKey) -> Result<Option<V>, CacheError> {
        self.insert(key, None, 0)
    }

    fn insert(&self, key: RegionKey, tile: Option<V>, size: usize) -> Result<Option<V>, CacheError> {
        let mut state = self.lock("put")?;

        let previous = state.entries.pop(&key);
        if let Some(ref previous) = previous {
            state.release(previous);
        }

        // The charge is clamped so the byte counter cannot overflow
        let headroom = usize::MAX - state.current_bytes;
        let size = if size > headroom {
            warn!(
                size = size,
                charged = headroom,
                "Region tile size estimate exceeds addressable budget: {}",
                key
            );
            headroom
        } else {
            size
        };

        state.entries.put(key, CacheEntry { tile, size });
        state.current_bytes += size;

        self.evict_over_budget(&mut state);

        Ok(previous.and_then(|entry| entry.tile))
    }

    /// Evict from the least-recently-used end until both ceilings hold.
    fn evict_over_budget(&self, state: &mut CacheState<V>) {
        while state.entries.len() > self.max_entries || state.current_bytes > self.max_bytes {
            // Only the entry just inserted is left
            if state.entries.len() <= 1 {
                if state.current_bytes > self.max_bytes {
                    warn!(
                        bytes = state.current_bytes,
                        max_bytes = self.max_bytes,
                        "Retaining single region tile larger than the cache budget"
                    );
                }
                break;
            }

            match state.entries.pop_lru() {
                Some((key, entry)) => {
                    state.release(&entry);
                    state.evictions += 1;
                    debug!(size = entry.size, "Evicted region tile: {}", key);
                }
                None => break,
            }
        }
    }

    /// Check whether a key is cached without updating recency.
    pub fn contains_key(&self, key: &RegionKey) -> Result<bool, CacheError> {
        let state = self.lock("contains_key")?;
        Ok(state.entries.contains(key))
    }

    /// Remove a single entry, returning its tile.
    pub fn remove(&self, key: &RegionKey) -> Result<Option<V>, CacheError> {
        let mut state = self.lock("remove")?;

        match state.entries.pop(key) {
            Some(entry) => {
                state.release(&entry);
                Ok(entry.tile)
            }
            None => Ok(None),
        }
    }

    /// Remove all entries and reset both counters.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.lock("clear")?;
        state.entries.clear();
        state.current_bytes = 0;
        Ok(())
    }

    /// Remove every tile decoded from the given source.
    ///
    /// Returns the number of entries removed.
    pub fn remove_for_source(&self, source_id: &str) -> Result<usize, CacheError> {
        let mut state = self.lock("remove_for_source")?;
        let removed = state.remove_matching(|key| key.is_from_source(source_id));

        debug!(
            removed = removed,
            bytes = state.current_bytes,
            "Invalidated region tiles for source {}",
            source_id
        );
        Ok(removed)
    }

    /// Remove every tile whose region overlaps `region`.
    ///
    /// Overlap ignores downsample and plane indices, so all resolutions of a
    /// stale area are dropped. Returns the number of entries removed.
    pub fn remove_overlapping(&self, region: &RegionKey) -> Result<usize, CacheError> {
        let mut state = self.lock("remove_overlapping")?;
        let removed = state.remove_matching(|key| key.overlaps(region));

        debug!(
            removed = removed,
            bytes = state.current_bytes,
            "Invalidated region tiles overlapping {}",
            region
        );
        Ok(removed)
    }

    /// Get the current number of entries, empty tiles included.
    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.lock("len")?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.lock("is_empty")?.entries.is_empty())
    }

    /// Get the summed estimated size of all entries in bytes.
    pub fn current_bytes(&self) -> Result<usize, CacheError> {
        Ok(self.lock("current_bytes")?.current_bytes)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Take a consistent snapshot of occupancy and activity counters.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let state = self.lock("stats")?;
        Ok(CacheStats {
            entries: state.entries.len(),
            bytes: state.current_bytes,
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            invalidations: state.invalidations,
        })
    }

    /// Recompute the byte total from the live entries.
    ///
    /// Used to check counter consistency; equals
    /// [`current_bytes`](Self::current_bytes) at every quiescent point.
    pub fn recount_bytes(&self) -> Result<usize, CacheError> {
        let state = self.lock("recount_bytes")?;
        Ok(state.entries.iter().map(|(_, entry)| entry.size).sum())
    }

    /// Re-run the estimator over the live tiles and sum the results.
    ///
    /// Matches [`current_bytes`](Self::current_bytes) whenever the estimator
    /// is deterministic and no charge was clamped. The estimator runs outside
    /// the lock.
    pub fn estimated_bytes(&self) -> Result<usize, CacheError> {
        let tiles: Vec<V> = {
            let state = self.lock("estimated_bytes")?;
            state
                .entries
                .iter()
                .filter_map(|(_, entry)| entry.tile.clone())
                .collect()
        };

        Ok(tiles
            .iter()
            .map(|tile| self.estimator.estimate(tile))
            .fold(0, usize::saturating_add))
    }
}

impl<V> fmt::Display for RegionCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.lock() {
            Ok(state) => {
                let empty = state
                    .entries
                    .iter()
                    .filter(|(_, entry)| entry.tile.is_none())
                    .count();
                write!(
                    f,
                    "RegionCache: {}/{} entries ({} empty), {}/{} bytes",
                    state.entries.len(),
                    self.max_entries,
                    empty,
                    state.current_bytes,
                    self.max_bytes
                )
            }
            Err(_) => write!(f, "RegionCache: <poisoned>"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
