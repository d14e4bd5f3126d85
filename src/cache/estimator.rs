//! Memory cost estimation for cached tiles.
//!
//! The cache never inspects tile values. It asks a [`SizeEstimator`] for an
//! approximate byte cost once, at insertion, and charges that amount against
//! its byte budget until the entry leaves the cache.
//!
//! Estimates only need to be consistent with what is actually stored; exact
//! accounting of allocator overhead is not required.

use std::borrow::Borrow;

use image::DynamicImage;

/// Estimates the memory footprint of a tile value in bytes.
///
/// Empty tiles (entries stored with [`RegionCache::put_empty`]) are never
/// passed to the estimator and always cost 0 bytes.
///
/// Any `Fn(&V) -> usize` closure that is `Send + Sync` is an estimator.
///
/// [`RegionCache::put_empty`]: super::RegionCache::put_empty
pub trait SizeEstimator<V>: Send + Sync {
    /// Approximate size of `value` in bytes.
    fn estimate(&self, value: &V) -> usize;
}

impl<V, F> SizeEstimator<V> for F
where
    F: Fn(&V) -> usize + Send + Sync,
{
    fn estimate(&self, value: &V) -> usize {
        self(value)
    }
}

// =============================================================================
// Decoded Images
// =============================================================================

/// Estimator for decoded raster tiles.
///
/// Charges `width * height * bytes_per_pixel`, ignoring per-image overhead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageSizeEstimator;

impl<T> SizeEstimator<T> for ImageSizeEstimator
where
    T: Borrow<DynamicImage>,
{
    fn estimate(&self, value: &T) -> usize {
        let image = value.borrow();
        let pixels = image.width() as usize * image.height() as usize;
        pixels.saturating_mul(image.color().bytes_per_pixel() as usize)
    }
}

// =============================================================================
// Encoded Payloads
// =============================================================================

/// Estimator for encoded tile payloads (e.g. `Bytes` or `Vec<u8>`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteLenEstimator;

impl<T> SizeEstimator<T> for ByteLenEstimator
where
    T: AsRef<[u8]>,
{
    fn estimate(&self, value: &T) -> usize {
        value.as_ref().len()
    }
}
