//! Cache quota recovery and maintenance over a capacity-bounded store.

use std::sync::Arc;
use std::time::Duration;

use fairway_client::clock::ManualClock;
use fairway_client::storage::{KeyValueStore, MemoryStore};
use fairway_integration_tests::{CLOCK_START_MILLIS, cache_over};

const TTL: Duration = Duration::from_secs(60);

fn key(i: usize) -> String {
    format!("course-{i:03}")
}

#[test]
fn test_full_store_evicts_oldest_namespace_entries() {
    let store = Arc::new(MemoryStore::with_capacity(2_000));
    store.set_item("profile_draft", r#"{"bio":"scratch golfer"}"#).unwrap();
    let clock = ManualClock::new(CLOCK_START_MILLIS);
    let cache = cache_over(store.clone(), &clock);

    // fill until the first write triggers eviction of course-000
    let mut written = 0;
    while cache.get::<String>(&key(0)).is_some() || written == 0 {
        assert!(written < 100, "store never filled up");
        clock.advance(Duration::from_millis(1));
        cache.set(&key(written), &format!("{written:03}"), TTL);
        written += 1;
    }

    let last = written - 1;
    let before_eviction = last;
    let evicted = (before_eviction * 20).div_ceil(100);

    // the write that hit the limit landed
    assert_eq!(cache.get::<String>(&key(last)), Some(format!("{last:03}")));

    // exactly the oldest ~20% are gone, the rest survive
    for i in 0..evicted {
        assert!(
            cache.get::<String>(&key(i)).is_none(),
            "{} survived",
            key(i)
        );
    }
    for i in evicted..last {
        assert!(cache.get::<String>(&key(i)).is_some(), "{} evicted", key(i));
    }

    // entries outside the namespace are untouched
    assert_eq!(
        store.get_item("profile_draft").unwrap().as_deref(),
        Some(r#"{"bio":"scratch golfer"}"#)
    );
}

#[test]
fn test_entry_larger_than_store_is_dropped() {
    let store = Arc::new(MemoryStore::with_capacity(200));
    let clock = ManualClock::new(CLOCK_START_MILLIS);
    let cache = cache_over(store.clone(), &clock);

    cache.set("small", &1, TTL);
    cache.set("huge", &"x".repeat(500), TTL);

    assert!(cache.get::<String>("huge").is_none());
    // eviction ran but the write still did not fit
    assert!(cache.get::<i32>("small").is_none());
}

#[test]
fn test_maintenance_sweeps_expired_then_trims() {
    let store = Arc::new(MemoryStore::new());
    store.set_item("unrelated", "kept").unwrap();
    let clock = ManualClock::new(CLOCK_START_MILLIS);
    let cache = cache_over(store.clone(), &clock);

    for i in 0..10 {
        clock.advance(Duration::from_millis(1));
        cache.set(&format!("expiring-{i:02}"), &i, Duration::from_secs(1));
    }
    for i in 0..60 {
        clock.advance(Duration::from_millis(1));
        cache.set(&key(i), &i, TTL);
    }
    clock.advance(Duration::from_secs(2));

    let report = cache.run_maintenance();

    assert_eq!(report.expired_removed, 10);
    assert_eq!(report.overflow_removed, 30);
    assert_eq!(report.remaining, 30);
    // newest kept
    assert_eq!(cache.get::<usize>(&key(59)), Some(59));
    assert!(cache.get::<usize>(&key(0)).is_none());
    assert_eq!(
        store.get_item("unrelated").unwrap().as_deref(),
        Some("kept")
    );
}

#[tokio::test(start_paused = true)]
async fn test_spawned_maintenance_runs_immediately_and_periodically() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(CLOCK_START_MILLIS);
    let cache = cache_over(store.clone(), &clock);
    cache.set("stale", &1, Duration::from_millis(10));
    clock.advance(Duration::from_millis(20));

    let handle = cache.spawn_maintenance(Duration::from_secs(3600));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(store.get_item("fairway_cache_v1_stale").unwrap().is_none());

    cache.set("later", &2, Duration::from_millis(10));
    clock.advance(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_secs(3601)).await;
    assert!(store.get_item("fairway_cache_v1_later").unwrap().is_none());

    handle.abort();
}
