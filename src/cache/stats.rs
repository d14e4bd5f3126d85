use serde::Serialize;

/// Point-in-time snapshot of a region cache's occupancy and activity.
///
/// All fields are read under the cache lock, so a snapshot is always
/// internally consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries, empty tiles included
    pub entries: usize,

    /// Summed estimated size of live entries in bytes
    pub bytes: usize,

    /// Entry ceiling
    pub max_entries: usize,

    /// Byte ceiling
    pub max_bytes: usize,

    /// Lookups that found an entry
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Entries dropped to stay within the ceilings
    pub evictions: u64,

    /// Entries dropped by source or overlap invalidation
    pub invalidations: u64,
}

impl CacheStats {
    /// Fraction of lookups that were hits, or 0.0 before the first lookup.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }

    /// Whether the cache currently exceeds either ceiling.
    ///
    /// This only happens while a single oversize tile is retained.
    pub fn is_over_budget(&self) -> bool {
        self.entries > self.max_entries || self.bytes > self.max_bytes
    }
}
