//! Bounded region-tile cache.
//!
//! This module provides the in-memory store that sits between a viewer's
//! tile requests and its (expensive) region decoders.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   RegionCache                    │
//! │  ┌────────────────────────┐  ┌────────────────┐  │
//! │  │ LruCache<RegionKey, _> │  │ SizeEstimator  │  │
//! │  │  (hash index + access  │  │  (bytes per    │  │
//! │  │   ordered list)        │  │   tile)        │  │
//! │  └────────────────────────┘  └────────────────┘  │
//! │   entry / byte counters, hit / miss statistics   │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`RegionKey`]: Identity of a cached tile (source, extent, downsample, plane)
//! - [`SizeEstimator`]: Caller-supplied byte cost of a tile
//! - [`RegionCache`]: LRU cache bounded by entry count and estimated bytes,
//!   with invalidation by source and by overlapping region
//! - [`CacheStats`]: Consistent snapshot of occupancy and activity

mod estimator;
mod key;
mod region_cache;
mod stats;

pub use estimator::{ByteLenEstimator, ImageSizeEstimator, SizeEstimator};
pub use key::RegionKey;
pub use region_cache::{default_max_entries, Lookup, RegionCache};
pub use stats::CacheStats;
