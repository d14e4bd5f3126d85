use thiserror::Error;

/// Errors raised by the region cache itself.
///
/// A cache miss is not an error; lookups return `Ok(None)` for that.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache lock was poisoned by a panic inside a critical section.
    ///
    /// Treat as transient at the call site: the cache offers no retry policy.
    #[error("Region cache lock poisoned during {operation}")]
    LockPoisoned { operation: &'static str },
}

/// Errors reported by a region decoder.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The source could not be opened or is no longer available
    #[error("Source not available: {0}")]
    SourceUnavailable(String),

    /// The requested region lies outside the source bounds
    #[error("Region out of bounds: {region}")]
    OutOfBounds { region: String },

    /// The decoder failed to produce pixels for the region
    #[error("Failed to decode {region}: {message}")]
    Failed { region: String, message: String },
}

/// Errors that can occur when fetching a region through a `RegionStore`.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The cache could not be accessed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The decoder failed for a cache miss
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Errors that can occur while running a simulated viewing session.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The simulation settings are invalid
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A region request failed
    #[error("Region request failed: {0}")]
    Store(#[from] StoreError),

    /// The cache could not be inspected after the run
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(String),
}
