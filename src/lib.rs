//! # WSI Region Cache
//!
//! A bounded, concurrent cache for decoded Whole Slide Image region tiles.
//!
//! Decoding a region of a whole-slide image is expensive, and a viewer asks
//! for the same regions over and over while the user pans and zooms. This
//! library keeps decoded tiles in memory under two ceilings, an entry count
//! and an estimated byte budget, and evicts least-recently-used tiles when
//! either is exceeded.
//!
//! ## Features
//!
//! - **Dual bounds**: Entry-count and memory ceilings enforced after every insertion
//! - **Pluggable sizing**: Tile cost comes from a caller-supplied [`SizeEstimator`]
//! - **Targeted invalidation**: Drop all tiles of a source, or all tiles overlapping a stale region
//! - **Singleflight decoding**: [`RegionStore`] shares one decode between concurrent misses
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`cache`] - Region keys, size estimators and the bounded LRU cache
//! - [`store`] - Cache-first region access in front of a pluggable decoder
//! - [`config`] - CLI and configuration types
//! - [`simulate`] - Synthetic multi-worker viewing sessions
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wsi_region_cache::{RegionCache, RegionKey};
//!
//! // Encoded tiles, charged by length, with at most 1000 entries and 1MB
//! let cache = RegionCache::new(|tile: &Vec<u8>| tile.len(), 1000, 1024 * 1024);
//!
//! let key = RegionKey::new("slides/sample.svs", 0, 0, 512, 512).with_downsample(2.0);
//! if cache.get(&key).unwrap().is_none() {
//!     let decoded = vec![0u8; 256 * 256 * 4];
//!     cache.put(key.clone(), decoded).unwrap();
//! }
//!
//! // The region was edited; drop everything overlapping it
//! let edited = RegionKey::new("slides/sample.svs", 100, 100, 10, 10);
//! assert_eq!(cache.remove_overlapping(&edited).unwrap(), 1);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod simulate;
pub mod store;

// Re-export commonly used types
pub use cache::{
    default_max_entries, ByteLenEstimator, CacheStats, ImageSizeEstimator, Lookup, RegionCache,
    RegionKey, SizeEstimator,
};
pub use config::{
    parse_byte_size, CacheConfig, CheckConfig, Cli, Command, SimulateConfig,
    DEFAULT_CACHE_MAX_BYTES,
};
pub use error::{CacheError, DecodeError, SimulationError, StoreError};
pub use simulate::{run_simulation, SimulationReport, SyntheticDecoder};
pub use store::{RegionDecoder, RegionResponse, RegionStore};
