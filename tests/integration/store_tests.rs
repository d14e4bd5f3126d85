//! Region store integration tests.
//!
//! Tests verify:
//! - Repeated requests are served from the cache
//! - Concurrent misses for one region share a single decode
//! - Closing a source and editing a region force re-decoding
//! - Decode failures surface and are not cached

use std::sync::Arc;
use std::time::Duration;

use wsi_region_cache::{DecodeError, RegionKey, RegionStore, StoreError};

use super::test_utils::{assert_counters_consistent, image_cache, TrackingDecoder};

fn make_store(decoder: TrackingDecoder) -> RegionStore<TrackingDecoder> {
    RegionStore::new(Arc::new(image_cache(1000, 64 * 1024 * 1024)), decoder)
}

#[tokio::test]
async fn test_second_request_is_cache_hit() {
    let store = make_store(TrackingDecoder::new(256));
    let region = RegionKey::new("slide.svs", 0, 0, 1024, 1024).with_downsample(4.0);

    let first = store.get_region(&region).await.unwrap();
    assert!(!first.cache_hit);
    let second = store.get_region(&region).await.unwrap();
    assert!(second.cache_hit);

    assert!(Arc::ptr_eq(
        first.tile.as_ref().unwrap(),
        second.tile.as_ref().unwrap()
    ));
    assert_eq!(store.decoder().decode_count(), 1);
    assert_eq!(store.cache().current_bytes().unwrap(), 256 * 256 * 4);
}

#[tokio::test]
async fn test_levels_are_cached_independently() {
    let store = make_store(TrackingDecoder::new(64));
    let full = RegionKey::new("slide.svs", 0, 0, 256, 256);
    let reduced = full.clone().with_downsample(4.0);

    store.get_region(&full).await.unwrap();
    let response = store.get_region(&reduced).await.unwrap();

    assert!(!response.cache_hit);
    assert_eq!(store.decoder().decoded_regions(), vec![full, reduced]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_decode() {
    let store = Arc::new(make_store(
        TrackingDecoder::new(128).with_delay(Duration::from_millis(50)),
    ));
    let region = RegionKey::new("slide.svs", 512, 512, 512, 512).with_downsample(4.0);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            let region = region.clone();
            tokio::spawn(async move { store.get_region(&region).await })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert!(response.tile.is_some());
    }

    assert_eq!(store.decoder().decode_count(), 1);
    assert_eq!(store.cache().len().unwrap(), 1);
}

#[tokio::test]
async fn test_request_after_timed_out_request_completes() {
    let store = make_store(TrackingDecoder::new(64).with_delay(Duration::from_millis(200)));
    let region = RegionKey::new("slide.svs", 0, 0, 256, 256);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), store.get_region(&region)).await;
    assert!(abandoned.is_err());

    let response = tokio::time::timeout(Duration::from_secs(2), store.get_region(&region))
        .await
        .expect("region stayed wedged after a cancelled request")
        .unwrap();
    assert!(response.tile.is_some());
    assert_eq!(store.decoder().decode_count(), 2);

    // The retried decode was cached
    assert!(store.get_region(&region).await.unwrap().cache_hit);
}

#[tokio::test]
async fn test_close_source_forces_redecode() {
    let store = make_store(TrackingDecoder::new(32));
    let kept = RegionKey::new("other.svs", 0, 0, 256, 256);

    for col in 0..4 {
        let region = RegionKey::new("slide.svs", col * 256, 0, 256, 256);
        store.get_region(&region).await.unwrap();
    }
    store.get_region(&kept).await.unwrap();

    assert_eq!(store.close_source("slide.svs").unwrap(), 4);
    assert!(store.get_region(&kept).await.unwrap().cache_hit);

    let reopened = store
        .get_region(&RegionKey::new("slide.svs", 0, 0, 256, 256))
        .await
        .unwrap();
    assert!(!reopened.cache_hit);
    assert_eq!(store.decoder().decode_count(), 6);
    assert_counters_consistent(store.cache().as_ref());
}

#[tokio::test]
async fn test_invalidate_region_drops_all_levels() {
    let store = make_store(TrackingDecoder::new(32));
    let full = RegionKey::new("slide.svs", 0, 0, 256, 256);
    let overview = RegionKey::new("slide.svs", 0, 0, 8192, 8192).with_downsample(32.0);
    let far = RegionKey::new("slide.svs", 4096, 4096, 256, 256);

    for region in [&full, &overview, &far] {
        store.get_region(region).await.unwrap();
    }

    let annotation_edit = RegionKey::new("slide.svs", 100, 100, 50, 50);
    assert_eq!(store.invalidate_region(&annotation_edit).unwrap(), 2);

    assert!(!store.get_region(&full).await.unwrap().cache_hit);
    assert!(!store.get_region(&overview).await.unwrap().cache_hit);
    assert!(store.get_region(&far).await.unwrap().cache_hit);
}

#[tokio::test]
async fn test_empty_regions_are_cached() {
    let store = make_store(TrackingDecoder::new(32).with_empty_source("sparse.svs"));
    let region = RegionKey::new("sparse.svs", 0, 0, 256, 256);

    let first = store.get_region(&region).await.unwrap();
    assert!(first.tile.is_none());
    let second = store.get_region(&region).await.unwrap();
    assert!(second.tile.is_none());
    assert!(second.cache_hit);

    assert_eq!(store.decoder().decode_count(), 1);
    assert_eq!(store.cache().len().unwrap(), 1);
    assert_eq!(store.cache().current_bytes().unwrap(), 0);
}

#[tokio::test]
async fn test_decode_failure_is_reported_and_not_cached() {
    let store = make_store(TrackingDecoder::new(32).with_failing_source("missing.svs"));
    let region = RegionKey::new("missing.svs", 0, 0, 256, 256);

    let result = store.get_region(&region).await;
    assert!(matches!(
        result,
        Err(StoreError::Decode(DecodeError::SourceUnavailable(ref id))) if id == "missing.svs"
    ));
    assert!(!store.cache().contains_key(&region).unwrap());

    assert!(store.get_region(&region).await.is_err());
    assert_eq!(store.decoder().decode_count(), 2);
}

#[tokio::test]
async fn test_stats_track_store_activity() {
    let store = make_store(TrackingDecoder::new(16));
    let region = RegionKey::new("slide.svs", 0, 0, 256, 256);

    store.get_region(&region).await.unwrap();
    store.get_region(&region).await.unwrap();
    store.close_source("slide.svs").unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.hits, 1);
    assert!(stats.misses >= 1);
    assert_eq!(stats.invalidations, 1);
    assert_eq!(stats.entries, 0);
}
