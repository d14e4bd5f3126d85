//! Concurrency integration tests.
//!
//! Tests verify:
//! - Interleaved get/put from many threads loses no updates
//! - Evictions are never double-counted under contention
//! - Invalidation racing with inserts keeps counters consistent

use std::sync::{Arc, Barrier};
use std::thread;

use wsi_region_cache::{RegionCache, RegionKey};

use super::test_utils::{assert_counters_consistent, image_cache, make_tile};

const THREADS: usize = 8;
const KEYS_PER_THREAD: i32 = 200;

fn worker_key(worker: usize, index: i32) -> RegionKey {
    RegionKey::new(format!("slide-{}.svs", worker), index * 256, 0, 256, 256)
}

#[test]
fn test_disjoint_workers_without_eviction() {
    let cache = Arc::new(image_cache(usize::MAX, usize::MAX));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for index in 0..KEYS_PER_THREAD {
                    let key = worker_key(worker, index);
                    assert!(cache.get(&key).unwrap().is_none());
                    cache.put(key.clone(), make_tile(4, 4)).unwrap();
                    assert!(cache.get(&key).unwrap().is_some());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats().unwrap();
    assert_eq!(stats.entries, THREADS * KEYS_PER_THREAD as usize);
    assert_eq!(stats.bytes, THREADS * KEYS_PER_THREAD as usize * 4 * 4 * 4);
    assert_eq!(stats.hits, (THREADS * KEYS_PER_THREAD as usize) as u64);
    assert_eq!(stats.misses, (THREADS * KEYS_PER_THREAD as usize) as u64);
    assert_counters_consistent(&cache);
}

#[test]
fn test_disjoint_workers_with_eviction() {
    // Room for 100 tiles of 8x8 RGBA, far fewer than are inserted
    let cache = Arc::new(image_cache(150, 100 * 8 * 8 * 4));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for index in 0..KEYS_PER_THREAD {
                    let key = worker_key(worker, index);
                    cache.put(key.clone(), make_tile(8, 8)).unwrap();
                    // Revisit an older key to mix hits and misses
                    let _ = cache.get(&worker_key(worker, index / 2)).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats().unwrap();
    assert_eq!(stats.entries, 100);
    assert_eq!(stats.bytes, 100 * 8 * 8 * 4);
    assert_eq!(
        stats.evictions as usize + stats.entries,
        THREADS * KEYS_PER_THREAD as usize
    );
    assert_counters_consistent(&cache);
}

#[test]
fn test_invalidation_racing_with_inserts() {
    let cache: Arc<RegionCache<_>> = Arc::new(image_cache(500, usize::MAX));
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let writers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for index in 0..KEYS_PER_THREAD {
                    let source = if index % 2 == 0 { "shared.svs" } else { "private.svs" };
                    let key = RegionKey::new(source, index * 64, worker as i32 * 64, 64, 64);
                    if index % 7 == 0 {
                        cache.put_empty(key).unwrap();
                    } else {
                        cache.put(key, make_tile(2, 2)).unwrap();
                    }
                }
            })
        })
        .collect();

    let invalidator = {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let mut removed = 0;
            for round in 0..50 {
                removed += cache.remove_for_source("shared.svs").unwrap();
                let stale = RegionKey::new("private.svs", round * 128, 0, 256, 4096);
                removed += cache.remove_overlapping(&stale).unwrap();
            }
            removed
        })
    };

    for handle in writers {
        handle.join().unwrap();
    }
    let removed = invalidator.join().unwrap();

    let stats = cache.stats().unwrap();
    assert_eq!(stats.invalidations as usize, removed);
    assert!(stats.entries <= stats.max_entries);
    assert_counters_consistent(&cache);

    cache.clear().unwrap();
    assert_eq!(cache.current_bytes().unwrap(), 0);
    assert!(cache.is_empty().unwrap());
}
