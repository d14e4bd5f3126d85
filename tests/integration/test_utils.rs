//! Test utilities for integration tests.
//!
//! This module provides tile builders, a tracking mock decoder and counter
//! consistency checks shared by the integration tests.

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wsi_region_cache::{
    DecodeError, ImageSizeEstimator, RegionCache, RegionDecoder, RegionKey,
};

pub type Tile = Arc<DynamicImage>;

// =============================================================================
// Tiles and Caches
// =============================================================================

/// Create an RGBA tile; it costs `width * height * 4` bytes.
pub fn make_tile(width: u32, height: u32) -> Tile {
    Arc::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([200, 120, 180, 255]),
    )))
}

/// Create a cache of decoded image tiles.
pub fn image_cache(max_entries: usize, max_bytes: usize) -> RegionCache<Tile> {
    RegionCache::new(ImageSizeEstimator, max_entries, max_bytes)
}

/// A 256x256 tile key in column `col` of `source`.
pub fn tile_key(source: &str, col: i32) -> RegionKey {
    RegionKey::new(source, col * 256, 0, 256, 256)
}

/// Assert that the byte counter equals the estimator applied to every live
/// tile, and that the entry ceiling holds.
pub fn assert_counters_consistent<V: Clone>(cache: &RegionCache<V>) {
    let stats = cache.stats().unwrap();
    assert_eq!(stats.bytes, cache.estimated_bytes().unwrap());
    assert_eq!(stats.bytes, cache.recount_bytes().unwrap());
    assert!(stats.entries <= stats.max_entries.max(1));
}

// =============================================================================
// Tracking Mock Decoder
// =============================================================================

/// A mock decoder that renders fixed-size tiles and tracks every decode.
pub struct TrackingDecoder {
    tile_size: u32,
    delay: Duration,
    failing_sources: HashSet<String>,
    empty_sources: HashSet<String>,
    decode_count: AtomicUsize,
    decoded: Mutex<Vec<RegionKey>>,
}

impl TrackingDecoder {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size,
            delay: Duration::ZERO,
            failing_sources: HashSet::new(),
            empty_sources: HashSet::new(),
            decode_count: AtomicUsize::new(0),
            decoded: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Decoding any region of `source` fails.
    pub fn with_failing_source(mut self, source: impl Into<String>) -> Self {
        self.failing_sources.insert(source.into());
        self
    }

    /// Every region of `source` decodes to nothing.
    pub fn with_empty_source(mut self, source: impl Into<String>) -> Self {
        self.empty_sources.insert(source.into());
        self
    }

    pub fn decode_count(&self) -> usize {
        self.decode_count.load(Ordering::SeqCst)
    }

    pub fn decoded_regions(&self) -> Vec<RegionKey> {
        self.decoded.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegionDecoder for TrackingDecoder {
    type Tile = Tile;

    async fn decode(&self, region: &RegionKey) -> Result<Option<Tile>, DecodeError> {
        self.decode_count.fetch_add(1, Ordering::SeqCst);
        self.decoded.lock().unwrap().push(region.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing_sources.contains(region.source_id()) {
            return Err(DecodeError::SourceUnavailable(region.source_id().to_string()));
        }
        if self.empty_sources.contains(region.source_id()) {
            return Ok(None);
        }

        Ok(Some(make_tile(self.tile_size, self.tile_size)))
    }
}
