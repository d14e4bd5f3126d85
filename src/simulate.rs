//! Synthetic viewing sessions.
//!
//! Drives a [`RegionStore`] the way a viewer's decode workers would: several
//! workers pan a small viewport across a set of slides, switching resolution
//! periodically, while source-lifecycle events invalidate parts of the cache.
//! Used by the `region-cache simulate` command to size a cache budget and to
//! check counter consistency under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheStats, ImageSizeEstimator, RegionKey};
use crate::config::SimulateConfig;
use crate::error::{DecodeError, SimulationError};
use crate::store::{RegionDecoder, RegionStore};

/// Viewport width in tiles.
const VIEW_COLS: usize = 4;

/// Viewport height in tiles.
const VIEW_ROWS: usize = 3;

const TILES_PER_FRAME: usize = VIEW_COLS * VIEW_ROWS;

/// Frames spent at one resolution before zooming.
const FRAMES_PER_LEVEL: usize = 16;

// =============================================================================
// Synthetic Decoder
// =============================================================================

/// Decoder that renders flat-colored RGBA tiles without touching any file.
///
/// Tiles whose grid position falls in a simulated background area decode to
/// nothing, exercising empty cache entries.
pub struct SyntheticDecoder {
    slide_size: u32,
    decodes: AtomicUsize,
}

impl SyntheticDecoder {
    pub fn new(slide_size: u32) -> Self {
        Self {
            slide_size,
            decodes: AtomicUsize::new(0),
        }
    }

    /// Number of decodes performed so far.
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }

    fn is_background(region: &RegionKey) -> bool {
        let col = (region.x() / region.width().max(1)) as i64;
        let row = (region.y() / region.height().max(1)) as i64;
        (col * 31 + row * 17) % 11 == 0
    }
}

#[async_trait]
impl RegionDecoder for SyntheticDecoder {
    type Tile = Arc<DynamicImage>;

    async fn decode(&self, region: &RegionKey) -> Result<Option<Self::Tile>, DecodeError> {
        self.decodes.fetch_add(1, Ordering::Relaxed);

        let size = self.slide_size as i64;
        if region.x() < 0
            || region.y() < 0
            || region.x() as i64 >= size
            || region.y() as i64 >= size
            || region.width() <= 0
            || region.height() <= 0
        {
            return Err(DecodeError::OutOfBounds {
                region: region.to_string(),
            });
        }

        if Self::is_background(region) {
            return Ok(None);
        }

        let downsample = region.downsample().max(1.0);
        let width = ((region.width() as f64 / downsample).ceil() as u32).max(1);
        let height = ((region.height() as f64 / downsample).ceil() as u32).max(1);
        let shade = Rgba([
            (region.x() / 97 % 256) as u8,
            (region.y() / 89 % 256) as u8,
            (downsample as u32 % 256) as u8,
            255,
        ]);

        let image = tokio::task::spawn_blocking(move || {
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, shade))
        })
        .await
        .map_err(|e| DecodeError::Failed {
            region: region.to_string(),
            message: e.to_string(),
        })?;

        Ok(Some(Arc::new(image)))
    }
}

// =============================================================================
// Workload
// =============================================================================

/// Summary of a simulated session.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Region requests issued across all workers
    pub requests: usize,

    /// Requests answered from the cache
    pub cache_hits: usize,

    /// Decodes performed on cache misses
    pub decodes: usize,

    /// Tiles removed by source closes and region edits
    pub invalidated: usize,

    /// Wall-clock duration of the session in milliseconds
    pub elapsed_ms: u64,

    /// Whether, after the run, the byte counter equalled the estimator
    /// re-applied to every live tile and the entry ceiling held
    pub consistent: bool,

    /// Final cache statistics
    pub stats: CacheStats,
}

#[derive(Debug, Default)]
struct WorkerTally {
    requests: usize,
    cache_hits: usize,
    invalidated: usize,
}

/// Compute the region requested by `worker` at `step`.
///
/// Each frame is a `VIEW_COLS x VIEW_ROWS` viewport shifted one tile to the
/// right of the previous one, so consecutive frames share most tiles. Workers
/// start two tiles apart and therefore also share tiles with each other.
pub fn region_for_step(config: &SimulateConfig, worker: usize, step: usize) -> RegionKey {
    let frame = step / TILES_PER_FRAME;
    let tile = step % TILES_PER_FRAME;

    let level = (frame / FRAMES_PER_LEVEL) % config.downsamples.len();
    let downsample = config.downsamples[level];
    let extent = ((config.tile_size as f64 * downsample) as usize).max(1);
    let per_row = (config.slide_size as usize / extent).max(1);

    let span_cols = per_row.saturating_sub(VIEW_COLS).max(1);
    let span_rows = per_row.saturating_sub(VIEW_ROWS).max(1);
    let origin_col = (worker * 2 + frame) % span_cols;
    let origin_row = (worker * 2 + frame / span_cols) % span_rows;

    let col = (origin_col + tile % VIEW_COLS).min(per_row - 1);
    let row = (origin_row + tile / VIEW_COLS).min(per_row - 1);

    let source = format!("slide-{}.svs", (worker + frame / 64) % config.sources);

    RegionKey::new(
        source,
        (col * extent) as i32,
        (row * extent) as i32,
        extent as i32,
        extent as i32,
    )
    .with_downsample(downsample)
}

async fn run_worker(
    store: Arc<RegionStore<SyntheticDecoder>>,
    config: Arc<SimulateConfig>,
    worker: usize,
) -> Result<WorkerTally, SimulationError> {
    let mut tally = WorkerTally::default();

    for step in 0..config.requests {
        let region = region_for_step(&config, worker, step);
        let response = store.get_region(&region).await?;

        tally.requests += 1;
        if response.cache_hit {
            tally.cache_hits += 1;
        }

        if worker == 0 && config.close_every > 0 && (step + 1) % config.close_every == 0 {
            let removed = store.close_source(region.source_id())?;
            debug!(worker = worker, removed = removed, "Closed {}", region.source_id());
            tally.invalidated += removed;
        }

        if config.edit_every > 0 && (step + 1) % config.edit_every == 0 {
            let removed = store.invalidate_region(&region)?;
            tally.invalidated += removed;
        }
    }

    Ok(tally)
}

/// Run a simulated viewing session and report the cache's behavior.
pub async fn run_simulation(config: &SimulateConfig) -> Result<SimulationReport, SimulationError> {
    config.validate().map_err(SimulationError::Config)?;

    let cache = Arc::new(
        config
            .cache
            .build_cache(ImageSizeEstimator)
            .map_err(SimulationError::Config)?,
    );
    let store = Arc::new(RegionStore::new(
        Arc::clone(&cache),
        SyntheticDecoder::new(config.slide_size),
    ));
    let shared_config = Arc::new(config.clone());

    info!(
        workers = config.workers,
        max_entries = cache.max_entries(),
        max_bytes = cache.max_bytes(),
        "Starting simulated session"
    );

    let start = Instant::now();
    let handles: Vec<_> = (0..config.workers)
        .map(|worker| {
            tokio::spawn(run_worker(
                Arc::clone(&store),
                Arc::clone(&shared_config),
                worker,
            ))
        })
        .collect();

    let mut total = WorkerTally::default();
    for handle in handles {
        let tally = handle
            .await
            .map_err(|e| SimulationError::Worker(e.to_string()))??;
        total.requests += tally.requests;
        total.cache_hits += tally.cache_hits;
        total.invalidated += tally.invalidated;
    }
    let elapsed = start.elapsed();

    let stats = cache.stats()?;
    let consistent =
        cache.estimated_bytes()? == stats.bytes && stats.entries <= stats.max_entries.max(1);

    Ok(SimulationReport {
        requests: total.requests,
        cache_hits: total.cache_hits,
        decodes: store.decoder().decodes(),
        invalidated: total.invalidated,
        elapsed_ms: elapsed.as_millis() as u64,
        consistent,
        stats,
    })
}

// =============================================================================
// Tests
// =============================================================================
