mod support;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bookbytes_cache::application::lookup::BookLookupService;
use bookbytes_cache::cache::{HotStore, Lookup, MemoryHotStore, NullDurableStore};
use bookbytes_cache::provider::ContentProvider;
use metrics_util::debugging::DebuggingRecorder;
use serial_test::serial;

use support::{
    CountingProvider, DownDurableStore, RecordingDurableStore, aged_entry, book_payload,
    cache_with, eventually, memory_hot,
};

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Hot tier eviction: single-slot store.
    let tiny = Arc::new(MemoryHotStore::new(
        NonZeroUsize::new(1).expect("capacity"),
        NonZeroUsize::new(1).expect("shards"),
    ));
    let tiny_cache = cache_with(tiny, Arc::new(NullDurableStore));
    tiny_cache
        .set("isbn:ol:1111111111111111", book_payload("one"), None)
        .await;
    tiny_cache
        .set("isbn:ol:2222222222222222", book_payload("two"), None)
        .await;

    // Hot hit/miss, durable hit/miss, write-behind gauge and invalidation.
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(memory_hot(), durable.clone());
    let _ = cache.get("isbn:ol:ffffffffffffffff").await;
    durable.insert(aged_entry(
        "isbn:ol:eeeeeeeeeeeeeeee",
        book_payload("durable"),
        Duration::from_secs(3_600),
        Duration::ZERO,
    ));
    let _ = cache.get("isbn:ol:eeeeeeeeeeeeeeee").await;
    let _ = cache.get("isbn:ol:eeeeeeeeeeeeeeee").await;
    cache.invalidate("isbn:ol:eeeeeeeeeeeeeeee").await;

    // Backend error.
    let broken = cache_with(memory_hot(), Arc::new(DownDurableStore));
    let _ = broken.get("search:ol:0000000000000000").await;

    // Provider latency and revalidation outcomes.
    let hot = memory_hot();
    let lookup_cache = cache_with(hot.clone(), Arc::new(NullDurableStore));
    let provider = Arc::new(CountingProvider::returning(book_payload("fresh")));
    let service = BookLookupService::new(
        lookup_cache,
        Arc::clone(&provider) as Arc<dyn ContentProvider>,
    );
    let lookup = Lookup::isbn("9780261103344");
    let week = Duration::from_secs(604_800);
    hot.put(aged_entry(
        &lookup.key("ol"),
        book_payload("stale"),
        week,
        week.mul_f64(0.95),
    ))
    .await
    .expect("put");
    service.lookup(&lookup).await.expect("stale hit");
    assert!(eventually(|| service.revalidator().in_flight_len() == 0).await);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "bookbytes_cache_l1_hit_total",
        "bookbytes_cache_l1_miss_total",
        "bookbytes_cache_l1_evict_total",
        "bookbytes_cache_l2_hit_total",
        "bookbytes_cache_l2_miss_total",
        "bookbytes_cache_backend_error_total",
        "bookbytes_cache_revalidation_total",
        "bookbytes_cache_invalidated_total",
        "bookbytes_cache_pending_writes",
        "bookbytes_provider_fetch_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
