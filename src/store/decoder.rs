use async_trait::async_trait;

use crate::cache::RegionKey;
use crate::error::DecodeError;

/// Trait for producing decoded tiles for a region.
///
/// This abstraction keeps the store independent of image formats and
/// decoding backends. CPU-heavy decoders should move their work off the
/// async runtime (e.g. with `tokio::task::spawn_blocking`).
#[async_trait]
pub trait RegionDecoder: Send + Sync {
    /// The decoded tile type, cloned out of the cache on every hit.
    type Tile: Clone + Send + Sync + 'static;

    /// Decode the given region.
    ///
    /// # Returns
    /// `Ok(None)` when the region legitimately decodes to nothing (for
    /// example, a region entirely outside the tissue of a sparse slide).
    async fn decode(&self, region: &RegionKey) -> Result<Option<Self::Tile>, DecodeError>;
}
