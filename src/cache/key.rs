//! Region keys identifying cached tiles.
//!
//! A key names a rectangular sub-region of an image source in full-resolution
//! pixel coordinates, together with the downsample factor the tile was
//! rendered at and its focal-plane / time-point indices.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// =============================================================================
// Region Key
// =============================================================================

/// Cache key for decoded region tiles.
///
/// Two keys are equal when all seven fields are equal. The downsample factor
/// is compared by bit pattern so that `Eq` and `Hash` agree.
#[derive(Debug, Clone)]
pub struct RegionKey {
    /// Source identifier (typically a file path or URI)
    source_id: Arc<str>,

    /// Left edge in full-resolution pixels
    x: i32,

    /// Top edge in full-resolution pixels
    y: i32,

    /// Width in full-resolution pixels
    width: i32,

    /// Height in full-resolution pixels
    height: i32,

    /// Resampling factor the tile was produced at (1.0 = full resolution)
    downsample: f64,

    /// Focal plane index
    z: i32,

    /// Time point index
    t: i32,
}

impl RegionKey {
    /// Create a key for a full-resolution region on plane `z = 0, t = 0`.
    pub fn new(source_id: impl Into<Arc<str>>, x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            source_id: source_id.into(),
            x,
            y,
            width,
            height,
            downsample: 1.0,
            z: 0,
            t: 0,
        }
    }

    /// Set the downsample factor.
    pub fn with_downsample(mut self, downsample: f64) -> Self {
        self.downsample = downsample;
        self
    }

    /// Set the focal plane and time point.
    pub fn with_plane(mut self, z: i32, t: i32) -> Self {
        self.z = z;
        self.t = t;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn downsample(&self) -> f64 {
        self.downsample
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub fn t(&self) -> i32 {
        self.t
    }

    /// Whether this key belongs to the given source.
    pub fn is_from_source(&self, source_id: &str) -> bool {
        &*self.source_id == source_id
    }

    /// Check whether two regions of the same source intersect with non-zero area.
    ///
    /// Downsample, z and t are ignored, so invalidation by overlap removes every
    /// resolution and plane of the affected area.
    pub fn overlaps(&self, other: &RegionKey) -> bool {
        if self.source_id != other.source_id || self.is_empty() || other.is_empty() {
            return false;
        }

        let (x, y, w, h) = self.extent();
        let (ox, oy, ow, oh) = other.extent();

        x < ox + ow && ox < x + w && y < oy + oh && oy < y + h
    }

    fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    // Widened so that extents near i32::MAX cannot overflow.
    fn extent(&self) -> (i64, i64, i64, i64) {
        (
            self.x as i64,
            self.y as i64,
            self.width as i64,
            self.height as i64,
        )
    }
}

impl PartialEq for RegionKey {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id
            && self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
            && self.downsample.to_bits() == other.downsample.to_bits()
            && self.z == other.z
            && self.t == other.t
    }
}

impl Eq for RegionKey {}

impl Hash for RegionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_id.hash(state);
        self.x.hash(state);
        self.y.hash(state);
        self.width.hash(state);
        self.height.hash(state);
        self.downsample.to_bits().hash(state);
        self.z.hash(state);
        self.t.hash(state);
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: x={}, y={}, w={}, h={}, downsample={}, z={}, t={}",
            self.source_id,
            self.x,
            self.y,
            self.width,
            self.height,
            self.downsample,
            self.z,
            self.t
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
