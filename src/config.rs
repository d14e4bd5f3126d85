//! Configuration management for the region cache.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `REGION_CACHE_` prefix
//! - Deserialization from a host application's settings (serde)
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```
//! use wsi_region_cache::config::CacheConfig;
//! use wsi_region_cache::{ImageSizeEstimator, RegionCache};
//! use image::DynamicImage;
//!
//! let config = CacheConfig {
//!     max_bytes: "256MB".to_string(),
//!     max_entries: None,
//! };
//! config.validate().unwrap();
//!
//! let cache: RegionCache<DynamicImage> = config.build_cache(ImageSizeEstimator).unwrap();
//! assert_eq!(cache.max_bytes(), 256 * 1024 * 1024);
//! ```
//!
//! # Environment Variables
//!
//! - `REGION_CACHE_MAX_BYTES` - Byte budget, e.g. `512MB` (default: 512MB)
//! - `REGION_CACHE_MAX_ENTRIES` - Entry ceiling (default: derived from the byte budget)

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::cache::{default_max_entries, RegionCache, SizeEstimator};

// =============================================================================
// Default Values
// =============================================================================

/// Default cache byte budget.
pub const DEFAULT_CACHE_MAX_BYTES: &str = "512MB";

/// Default number of simulated decode workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of region requests per simulated worker.
pub const DEFAULT_REQUESTS_PER_WORKER: usize = 2_000;

/// Default simulated tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default simulated slide edge length in full-resolution pixels.
pub const DEFAULT_SLIDE_SIZE: u32 = 65_536;

fn default_max_bytes() -> String {
    DEFAULT_CACHE_MAX_BYTES.to_string()
}

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a human-readable byte size such as `"512MB"`, `"2 GB"` or `"4096"`.
///
/// Units are binary multiples (`KB` = 1024 bytes) and case-insensitive.
pub fn parse_byte_size(input: &str) -> Result<usize, String> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(format!("invalid byte size '{}': missing number", input));
    }

    let value: usize = digits
        .parse()
        .map_err(|e| format!("invalid byte size '{}': {}", input, e))?;

    let multiplier: usize = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        other => return Err(format!("invalid byte size '{}': unknown unit '{}'", input, other)),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("invalid byte size '{}': too large", input))
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Region cache limits.
#[derive(Args, Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum summed size of cached tiles (e.g. 512MB, 2GB).
    #[arg(
        long = "cache-max-bytes",
        default_value = DEFAULT_CACHE_MAX_BYTES,
        env = "REGION_CACHE_MAX_BYTES"
    )]
    #[serde(default = "default_max_bytes")]
    pub max_bytes: String,

    /// Maximum number of cached tiles.
    ///
    /// If not specified, derived from the byte budget assuming 256x256 RGBA tiles.
    #[arg(long = "cache-max-entries", env = "REGION_CACHE_MAX_ENTRIES")]
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_entries: None,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_bytes_value()? == 0 {
            return Err("cache max_bytes must be greater than 0".to_string());
        }

        if self.max_entries == Some(0) {
            return Err("cache max_entries must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the byte budget in bytes.
    pub fn max_bytes_value(&self) -> Result<usize, String> {
        parse_byte_size(&self.max_bytes)
    }

    /// Get the entry ceiling, falling back to the byte-budget heuristic.
    pub fn resolved_max_entries(&self) -> Result<usize, String> {
        match self.max_entries {
            Some(max_entries) => Ok(max_entries),
            None => Ok(default_max_entries(self.max_bytes_value()?)),
        }
    }

    /// Build an empty cache with these limits.
    pub fn build_cache<V: Clone>(
        &self,
        estimator: impl SizeEstimator<V> + 'static,
    ) -> Result<RegionCache<V>, String> {
        self.validate()?;
        Ok(RegionCache::new(
            estimator,
            self.resolved_max_entries()?,
            self.max_bytes_value()?,
        ))
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Region Cache - bounded tile cache for Whole Slide Image viewers.
#[derive(Parser, Debug, Clone)]
#[command(name = "region-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a synthetic multi-worker viewing session against the cache.
    Simulate(SimulateConfig),

    /// Validate cache settings and print the resolved limits.
    Check(CheckConfig),
}

/// Configuration for the `check` subcommand.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub cache: CacheConfig,
}

/// Configuration for the `simulate` subcommand.
#[derive(Args, Debug, Clone)]
pub struct SimulateConfig {
    #[command(flatten)]
    pub cache: CacheConfig,

    /// Number of concurrent decode workers.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "REGION_CACHE_WORKERS")]
    pub workers: usize,

    /// Region requests issued by each worker.
    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_WORKER)]
    pub requests: usize,

    /// Number of distinct simulated slides.
    #[arg(long, default_value_t = 2)]
    pub sources: usize,

    /// Simulated slide width and height in full-resolution pixels.
    #[arg(long, default_value_t = DEFAULT_SLIDE_SIZE)]
    pub slide_size: u32,

    /// Tile edge length in output pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Downsample factors visited while panning (comma-separated).
    #[arg(long, value_delimiter = ',', default_values_t = [1.0, 4.0, 16.0])]
    pub downsamples: Vec<f64>,

    /// Close and reopen a slide every N requests of the first worker (0 = never).
    #[arg(long, default_value_t = 0)]
    pub close_every: usize,

    /// Invalidate the region around the current tile every N requests (0 = never).
    #[arg(long, default_value_t = 0)]
    pub edit_every: usize,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SimulateConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;

        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.sources == 0 {
            return Err("sources must be greater than 0".to_string());
        }
        if self.slide_size > i32::MAX as u32 {
            return Err(format!("slide_size must be at most {}", i32::MAX));
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.downsamples.is_empty() {
            return Err("at least one downsample is required".to_string());
        }
        if let Some(ds) = self.downsamples.iter().find(|ds| !(**ds >= 1.0)) {
            return Err(format!("downsample must be >= 1, got {}", ds));
        }

        // At least one full tile must fit at the coarsest level
        let coarsest = self.downsamples.iter().cloned().fold(1.0, f64::max);
        if (self.tile_size as f64 * coarsest) > self.slide_size as f64 {
            return Err(format!(
                "slide_size {} is smaller than one tile at downsample {}",
                self.slide_size, coarsest
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
