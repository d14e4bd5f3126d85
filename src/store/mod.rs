//! Region store layer.
//!
//! This module connects the cache to the rest of a viewer: decode workers ask
//! the store for regions, and source-lifecycle handlers tell it when a source
//! is closed or a region has changed.
//!
//! # Components
//!
//! - [`RegionStore`]: Cache-first region access with singleflight decoding
//! - [`RegionDecoder`]: Pluggable decoder invoked on cache misses
//! - [`RegionResponse`]: Decoded tile plus cache-hit flag

mod decoder;
mod service;

pub use decoder::RegionDecoder;
pub use service::{RegionResponse, RegionStore};
