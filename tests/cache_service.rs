mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use bookbytes_cache::cache::{
    CacheCategory, CacheConfig, CacheService, HotStore, LookupParams, NullDurableStore, Tier,
};

use support::{
    CorruptHotStore, DownDurableStore, DownHotStore, HangingDurableStore, RecordingDurableStore,
    StalledDurableStore, aged_entry, book_payload, cache_with, eventually, memory_hot,
};

const DAY: Duration = Duration::from_secs(86_400);

fn isbn_key(cache: &CacheService, isbn: &str) -> String {
    cache.build_key(
        CacheCategory::Isbn,
        "ol",
        &LookupParams::new().with("isbn", isbn),
    )
}

#[tokio::test]
async fn set_then_get_serves_from_hot_tier() {
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(memory_hot(), durable.clone());
    let key = isbn_key(&cache, "9780261103344");

    cache.set(&key, book_payload("The Hobbit"), None).await;
    let lookup = cache.get(&key).await;

    assert_eq!(lookup.payload, Some(book_payload("The Hobbit")));
    assert_eq!(lookup.tier, Some(Tier::Hot));
    assert!(!lookup.needs_revalidation);

    assert!(cache.shutdown().await);
    let row = durable.row(&key).expect("write-behind reached durable tier");
    assert_eq!(row.source, "ol");
    assert_eq!(row.original_ttl, Duration::from_secs(604_800));
}

#[tokio::test]
async fn miss_reports_no_tier() {
    let cache = cache_with(memory_hot(), Arc::new(RecordingDurableStore::new()));
    let lookup = cache.get("isbn:ol:0000000000000000").await;
    assert!(!lookup.is_hit());
    assert_eq!(lookup.tier, None);
    assert!(!lookup.needs_revalidation);
}

#[tokio::test]
async fn set_applies_jitter_within_ten_percent() {
    let hot = memory_hot();
    let cache = cache_with(hot.clone(), Arc::new(NullDurableStore));

    for n in 0..200 {
        let key = format!("search:ol:{n:016x}");
        cache.set(&key, book_payload("Dune"), Some(DAY)).await;
        let entry = hot.get(&key).await.expect("get").expect("entry stored");
        let ttl = entry.ttl().as_secs_f64();
        assert!(
            (77_760.0..=95_040.0).contains(&ttl),
            "ttl {ttl} outside jitter window"
        );
        assert_eq!(entry.original_ttl, DAY);
    }
}

#[tokio::test]
async fn durable_hit_repopulates_hot_tier() {
    let hot = memory_hot();
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(hot.clone(), durable.clone());
    let key = isbn_key(&cache, "9780441013593");

    durable.insert(aged_entry(
        &key,
        book_payload("Dune"),
        DAY,
        Duration::from_secs(3_600),
    ));

    let first = cache.get(&key).await;
    assert_eq!(first.tier, Some(Tier::Durable));
    assert_eq!(first.payload, Some(book_payload("Dune")));
    assert!(!first.needs_revalidation);

    let copy = hot.get(&key).await.expect("get").expect("repopulated");
    let row = durable.row(&key).expect("row");
    assert!(copy.expires_at <= row.expires_at, "copy outlives the durable row");

    let second = cache.get(&key).await;
    assert_eq!(second.tier, Some(Tier::Hot));

    assert!(eventually(|| durable.hits.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn entry_near_expiry_is_flagged_for_revalidation() {
    let hot = memory_hot();
    let cache = cache_with(hot.clone(), Arc::new(NullDurableStore));
    let key = "work:ol:5f1c0a9e3b7d2c4e";

    hot.put(aged_entry(
        key,
        book_payload("The Left Hand of Darkness"),
        Duration::from_secs(100),
        Duration::from_secs(90),
    ))
    .await
    .expect("put");

    let lookup = cache.get(key).await;
    assert!(lookup.is_hit());
    assert!(lookup.needs_revalidation);
}

#[tokio::test]
async fn stale_durable_hit_is_flagged_before_and_after_repopulation() {
    let hot = memory_hot();
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(hot.clone(), durable.clone());
    let key = isbn_key(&cache, "9780141439518");

    durable.insert(aged_entry(
        &key,
        book_payload("Pride and Prejudice"),
        Duration::from_secs(100),
        Duration::from_secs(90),
    ));

    let first = cache.get(&key).await;
    assert_eq!(first.tier, Some(Tier::Durable));
    assert!(first.needs_revalidation);

    let second = cache.get(&key).await;
    assert_eq!(second.tier, Some(Tier::Hot));
    assert!(second.needs_revalidation);
}

#[tokio::test]
async fn durable_timeout_during_get_is_a_miss() {
    let cache = cache_with(memory_hot(), Arc::new(HangingDurableStore));

    let started = Instant::now();
    let lookup = cache.get("isbn:ol:0123456789abcdef").await;
    let elapsed = started.elapsed();

    assert!(!lookup.is_hit());
    assert_eq!(lookup.tier, None);
    assert!(elapsed >= Duration::from_millis(450), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
}

#[tokio::test]
async fn corrupt_hot_entry_is_discarded_as_miss() {
    let hot = Arc::new(CorruptHotStore::default());
    let cache = cache_with(hot.clone(), Arc::new(NullDurableStore));

    let lookup = cache.get("isbn:ol:deadbeefdeadbeef").await;
    assert!(!lookup.is_hit());
    assert_eq!(
        hot.deleted.lock().expect("deleted lock").as_slice(),
        ["isbn:ol:deadbeefdeadbeef".to_string()]
    );
}

#[tokio::test]
async fn hot_outage_falls_back_to_durable_tier() {
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(Arc::new(DownHotStore), durable.clone());
    let key = isbn_key(&cache, "9780547928227");

    cache.set(&key, book_payload("The Hobbit"), None).await;
    assert!(cache.shutdown().await);
    assert_eq!(durable.len(), 1);

    let lookup = cache.get(&key).await;
    assert_eq!(lookup.tier, Some(Tier::Durable));
    assert_eq!(lookup.payload, Some(book_payload("The Hobbit")));
}

#[tokio::test]
async fn total_outage_degrades_to_miss() {
    let cache = cache_with(Arc::new(DownHotStore), Arc::new(DownDurableStore));
    let key = isbn_key(&cache, "9780547928227");

    cache.set(&key, book_payload("The Hobbit"), None).await;
    assert!(!cache.get(&key).await.is_hit());
    assert_eq!(cache.invalidate(&key).await, 0);
    assert_eq!(cache.invalidate_pattern("search:*").await, 0);
    assert!(cache.purge_expired().await.is_err());
}

#[tokio::test]
async fn invalidate_removes_key_from_both_tiers() {
    let hot = memory_hot();
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(hot.clone(), durable.clone());
    let key = isbn_key(&cache, "9780261103344");

    cache.set(&key, book_payload("The Hobbit"), None).await;
    assert_eq!(cache.invalidate(&key).await, 2);

    assert!(!cache.get(&key).await.is_hit());
    assert!(durable.row(&key).is_none());
    assert_eq!(cache.invalidate(&key).await, 0);
}

#[tokio::test]
async fn invalidate_waits_for_slow_write_behind() {
    let durable = Arc::new(RecordingDurableStore::with_upsert_delay(
        Duration::from_millis(50),
    ));
    let cache = cache_with(memory_hot(), durable.clone());
    let key = isbn_key(&cache, "9780261103344");

    cache.set(&key, book_payload("The Hobbit"), None).await;
    cache.invalidate(&key).await;
    assert!(cache.shutdown().await);

    assert!(durable.row(&key).is_none(), "stale write resurrected the row");
}

#[tokio::test]
async fn read_during_invalidation_does_not_restore_hot_copy() {
    let durable = Arc::new(RecordingDurableStore::with_delete_delay(
        Duration::from_millis(100),
    ));
    let cache = cache_with(memory_hot(), durable.clone());
    let key = isbn_key(&cache, "9780261103344");
    durable.insert(aged_entry(&key, book_payload("old"), DAY, Duration::ZERO));

    let invalidation = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        tokio::spawn(async move { cache.invalidate(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let during = cache.get(&key).await;
    assert_eq!(during.tier, Some(Tier::Durable));

    assert_eq!(invalidation.await.expect("join"), 2);
    assert!(!cache.get(&key).await.is_hit());
    assert!(durable.row(&key).is_none());
}

#[tokio::test]
async fn read_during_pattern_invalidation_does_not_restore_hot_copy() {
    let durable = Arc::new(RecordingDurableStore::with_delete_delay(
        Duration::from_millis(100),
    ));
    let cache = cache_with(memory_hot(), durable.clone());
    let key = cache.build_key(
        CacheCategory::Search,
        "ol",
        &LookupParams::new().with("title", "dune"),
    );
    durable.insert(aged_entry(&key, book_payload("old page"), DAY, Duration::ZERO));

    let invalidation = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.invalidate_pattern("search:*").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.get(&key).await.is_hit());

    assert_eq!(invalidation.await.expect("join"), 2);
    assert!(!cache.get(&key).await.is_hit());
}

#[tokio::test]
async fn invalidate_does_not_wait_on_other_keys_writes() {
    let cache = cache_with(memory_hot(), Arc::new(StalledDurableStore));
    let stuck = isbn_key(&cache, "9780261103344");
    cache.set(&stuck, book_payload("Stuck"), None).await;
    assert_eq!(cache.pending_writes(), 1);

    let started = Instant::now();
    cache.invalidate(&isbn_key(&cache, "9780441013593")).await;
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "invalidate waited {:?}",
        started.elapsed()
    );

    let started = Instant::now();
    cache.invalidate_pattern("work:*").await;
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "invalidate_pattern waited {:?}",
        started.elapsed()
    );
    assert_eq!(cache.pending_writes(), 1);
}

#[tokio::test]
async fn invalidate_pattern_only_touches_matching_category() {
    let hot = memory_hot();
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(hot.clone(), durable.clone());

    let search_keys: Vec<String> = ["dune", "hobbit", "emma"]
        .iter()
        .map(|title| {
            cache.build_key(
                CacheCategory::Search,
                "ol",
                &LookupParams::new().with("title", title),
            )
        })
        .collect();
    for key in &search_keys {
        cache.set(key, book_payload("result page"), None).await;
    }
    let isbn = isbn_key(&cache, "9780261103344");
    cache.set(&isbn, book_payload("The Hobbit"), None).await;

    let removed = cache.invalidate_pattern("search:*").await;
    assert_eq!(removed, 6);

    for key in &search_keys {
        assert!(!cache.get(key).await.is_hit());
    }
    assert!(cache.get(&isbn).await.is_hit());
    assert!(durable.row(&isbn).is_some());
}

#[tokio::test]
async fn shutdown_flushes_pending_writes() {
    let durable = Arc::new(RecordingDurableStore::with_upsert_delay(
        Duration::from_millis(30),
    ));
    let cache = cache_with(memory_hot(), durable.clone());

    for isbn in ["9780261103344", "9780441013593", "9780547928227"] {
        let key = isbn_key(&cache, isbn);
        cache.set(&key, book_payload(isbn), None).await;
    }
    assert!(cache.pending_writes() > 0);

    assert!(cache.shutdown().await);
    assert_eq!(cache.pending_writes(), 0);
    assert_eq!(durable.len(), 3);
}

#[tokio::test]
async fn shutdown_gives_up_after_timeout() {
    let config = CacheConfig {
        operation_timeout: Duration::from_secs(30),
        shutdown_timeout: Duration::from_millis(50),
        ..CacheConfig::default()
    };
    let cache = CacheService::new(memory_hot(), Arc::new(StalledDurableStore), config);

    cache
        .set("isbn:ol:0123456789abcdef", book_payload("Stuck"), None)
        .await;
    assert!(!cache.shutdown().await);
    assert_eq!(cache.pending_writes(), 1);
}

#[tokio::test]
async fn purge_expired_drops_dead_durable_rows() {
    let durable = Arc::new(RecordingDurableStore::new());
    let cache = cache_with(memory_hot(), durable.clone());

    durable.insert(aged_entry(
        "search:ol:aaaaaaaaaaaaaaaa",
        book_payload("old"),
        Duration::from_secs(60),
        Duration::from_secs(120),
    ));
    durable.insert(aged_entry(
        "search:ol:bbbbbbbbbbbbbbbb",
        book_payload("fresh"),
        DAY,
        Duration::ZERO,
    ));

    assert_eq!(cache.purge_expired().await.expect("purge"), 1);
    assert_eq!(durable.len(), 1);
}
