//! Region Store for orchestrating cached region decoding.
//!
//! The RegionStore is the request-layer entry point in front of the cache:
//! - Cache lookups before decoding
//! - Decoding on a miss via a [`RegionDecoder`]
//! - Result caching (including regions that decode to nothing)
//! - Source-lifecycle invalidation
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      RegionStore                       │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │                  get_region()                    │  │
//! │  │  1. Check cache      3. Decode (one per key)     │  │
//! │  │  2. Join in-flight   4. Cache & return           │  │
//! │  └──────────────────────────────────────────────────┘  │
//! │              │                          │              │
//! │              ▼                          ▼              │
//! │     ┌─────────────────┐       ┌──────────────────┐     │
//! │     │   RegionCache   │       │  RegionDecoder   │     │
//! │     └─────────────────┘       └──────────────────┘     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Cancellation
//!
//! The request that starts a decode may be dropped before the decode ends,
//! e.g. by a viewer-side timeout. Its in-flight slot is then released and
//! any waiters retry, one of them taking over the decode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use crate::cache::{CacheStats, Lookup, RegionCache, RegionKey};
use crate::error::{CacheError, StoreError};

use super::decoder::RegionDecoder;

// =============================================================================
// Region Response
// =============================================================================

/// Response from the region store.
#[derive(Debug, Clone)]
pub struct RegionResponse<T> {
    /// The decoded tile, or `None` if the region decodes to nothing
    pub tile: Option<T>,

    /// Whether this tile was served from cache
    pub cache_hit: bool,
}

// =============================================================================
// In-flight Decodes
// =============================================================================

type DecodeResult<T> = Result<Option<T>, StoreError>;

/// State for an in-flight decode.
struct InFlightState<T> {
    /// Notification for waiters
    notify: Notify,
    /// Result of the decode (set when complete)
    result: Mutex<Option<DecodeResult<T>>>,
    /// Set once the slot has left the in-flight map, with or without a result
    done: AtomicBool,
}

impl<T: Clone> InFlightState<T> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    fn set_result(&self, result: DecodeResult<T>) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }

    /// `None` while the decode is running, `Some(None)` if it was abandoned.
    fn outcome(&self) -> Option<Option<DecodeResult<T>>> {
        if !self.done.load(Ordering::Acquire) {
            return None;
        }
        Some(
            self.result
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        )
    }
}

type InFlightMap<T> = Mutex<HashMap<RegionKey, Arc<InFlightState<T>>>>;

fn lock_in_flight<T>(
    in_flight: &InFlightMap<T>,
) -> MutexGuard<'_, HashMap<RegionKey, Arc<InFlightState<T>>>> {
    // The map holds no invariant a panic could break
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the leader's in-flight slot and wakes waiters when dropped,
/// including when the leader's future is cancelled mid-decode.
struct LeaderGuard<'a, T> {
    in_flight: &'a InFlightMap<T>,
    region: &'a RegionKey,
    state: Arc<InFlightState<T>>,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        {
            let mut in_flight = lock_in_flight(self.in_flight);
            if in_flight
                .get(self.region)
                .is_some_and(|current| Arc::ptr_eq(current, &self.state))
            {
                in_flight.remove(self.region);
            }
        }
        self.state.done.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }
}

// =============================================================================
// Region Store
// =============================================================================

/// Service for decoding and caching region tiles.
///
/// The cache is passed in rather than owned so that it can be shared with
/// other components (and inspected in tests).
///
/// # Type Parameters
///
/// * `D` - The region decoder
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use wsi_region_cache::{ImageSizeEstimator, RegionCache, RegionKey, RegionStore};
///
/// let cache = Arc::new(RegionCache::with_byte_budget(ImageSizeEstimator, 512 * 1024 * 1024));
/// let store = RegionStore::new(cache, decoder);
///
/// let region = RegionKey::new("slides/sample.svs", 0, 0, 1024, 1024).with_downsample(4.0);
/// let response = store.get_region(&region).await?;
///
/// // Source closed by the user
/// store.close_source("slides/sample.svs")?;
/// ```
pub struct RegionStore<D: RegionDecoder> {
    /// Shared tile cache
    cache: Arc<RegionCache<D::Tile>>,

    /// Decoder for cache misses
    decoder: D,

    /// In-flight decodes for singleflight pattern
    in_flight: InFlightMap<D::Tile>,

    /// Invalidation epoch. Held across every invalidation and every insert of
    /// a decoded tile, so a decode that straddles an invalidation is never
    /// cached.
    epoch: Mutex<u64>,
}

impl<D: RegionDecoder> RegionStore<D> {
    /// Create a new region store over a shared cache.
    pub fn new(cache: Arc<RegionCache<D::Tile>>, decoder: D) -> Self {
        Self {
            cache,
            decoder,
            in_flight: Mutex::new(HashMap::new()),
            epoch: Mutex::new(0),
        }
    }

    /// Get the shared cache.
    pub fn cache(&self) -> &Arc<RegionCache<D::Tile>> {
        &self.cache
    }

    /// Get the decoder.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Get a region tile, decoding it on a cache miss.
    ///
    /// Concurrent requests for the same uncached region share one decode.
    /// Dropping the returned future is safe at any point.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache lock is poisoned or the decoder fails.
    /// Decoder failures are not cached.
    pub async fn get_region(
        &self,
        region: &RegionKey,
    ) -> Result<RegionResponse<D::Tile>, StoreError> {
        // Fast path: check cache
        if let Some(tile) = self.cached(region)? {
            return Ok(RegionResponse {
                tile,
                cache_hit: true,
            });
        }

        // Slow path: join an in-flight decode or become leader
        loop {
            let (state, leader) = {
                let mut in_flight = lock_in_flight(&self.in_flight);

                if let Some(state) = in_flight.get(region) {
                    (Arc::clone(state), false)
                } else {
                    // A decode may have completed between the fast path and here
                    if let Some(tile) = self.cached(region)? {
                        return Ok(RegionResponse {
                            tile,
                            cache_hit: true,
                        });
                    }

                    let state = Arc::new(InFlightState::new());
                    in_flight.insert(region.clone(), Arc::clone(&state));
                    (state, true)
                }
            };

            if leader {
                let guard = LeaderGuard {
                    in_flight: &self.in_flight,
                    region,
                    state,
                };
                let result = self.decode_and_cache(region).await;
                guard.state.set_result(result.clone());
                drop(guard);

                return result.map(|tile| RegionResponse {
                    tile,
                    cache_hit: false,
                });
            }

            // Register interest before checking, so a notification sent in
            // between is not lost
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if state.outcome().is_none() {
                notified.await;
            }

            match state.outcome() {
                Some(Some(result)) => {
                    return result.map(|tile| RegionResponse {
                        tile,
                        cache_hit: false,
                    });
                }
                // Leader went away without a result, try again
                _ => debug!("Region decode abandoned, retrying: {}", region),
            }
        }
    }

    /// `Some(tile)` on a hit (where `tile` may itself be empty), `None` on a miss.
    fn cached(&self, region: &RegionKey) -> Result<Option<Option<D::Tile>>, CacheError> {
        Ok(match self.cache.lookup(region)? {
            Lookup::Tile(tile) => Some(Some(tile)),
            Lookup::Empty => Some(None),
            Lookup::Miss => None,
        })
    }

    fn lock_epoch(&self, operation: &'static str) -> Result<MutexGuard<'_, u64>, CacheError> {
        self.epoch
            .lock()
            .map_err(|_| CacheError::LockPoisoned { operation })
    }

    /// Decode a region and cache the result.
    async fn decode_and_cache(&self, region: &RegionKey) -> DecodeResult<D::Tile> {
        let started = *self.lock_epoch("decode")?;
        let tile = self.decoder.decode(region).await?;

        let epoch = self.lock_epoch("cache_decoded")?;
        if *epoch != started {
            debug!("Region invalidated during decode, not caching: {}", region);
            return Ok(tile);
        }

        match tile {
            Some(ref tile) => self.cache.put(region.clone(), tile.clone())?,
            None => self.cache.put_empty(region.clone())?,
        };
        drop(epoch);

        Ok(tile)
    }

    /// Drop every cached tile of a source, e.g. when it is closed or reopened.
    ///
    /// Returns the number of tiles removed.
    pub fn close_source(&self, source_id: &str) -> Result<usize, CacheError> {
        let mut epoch = self.lock_epoch("close_source")?;
        *epoch = epoch.wrapping_add(1);
        self.cache.remove_for_source(source_id)
    }

    /// Drop every cached tile overlapping a region whose content has changed.
    ///
    /// Returns the number of tiles removed.
    pub fn invalidate_region(&self, region: &RegionKey) -> Result<usize, CacheError> {
        let mut epoch = self.lock_epoch("invalidate_region")?;
        *epoch = epoch.wrapping_add(1);
        self.cache.remove_overlapping(region)
    }

    /// Get a snapshot of the cache statistics.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        self.cache.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================
