//! End-to-end coordinator behavior against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pathcache::{
    Attribute, AttributeValue, CacheError, CacheStatus, CacheStore, KeySpec, MemoryStore,
    PathCache, PrefixValues,
};

fn history_spec(user: &str, page: &str) -> KeySpec {
    KeySpec::new()
        .path("/history")
        .method("GET")
        .user(user)
        .get(vec![page])
}

fn history_prefix(user: &str) -> PrefixValues {
    PrefixValues::new()
        .path("/history")
        .method("GET")
        .user(user)
}

#[tokio::test]
async fn round_trip_replays_without_recomputing() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    let spec = history_spec("alice", "1");
    let computed = AtomicUsize::new(0);

    let compute = || {
        computed.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, CacheError>("page one".to_string()) }
    };

    let (first, status) = cache
        .get_or_compute_with_status(&spec, None, compute)
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Miss);

    let (second, status) = cache
        .get_or_compute_with_status(&spec, None, || async {
            panic!("must not recompute a cached entry")
        })
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(first, second);
    assert_eq!(computed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recursive_invalidation_removes_the_whole_subtree() {
    let store = Arc::new(MemoryStore::<String>::new());
    let cache = PathCache::new(store.clone());
    for page in ["1", "2"] {
        cache
            .get_or_compute(&history_spec("alice", page), None, || async {
                Ok(format!("page {page}"))
            })
            .await
            .unwrap();
    }
    cache
        .get_or_compute(&history_spec("bob", "1"), None, || async {
            Ok("bob's page".to_string())
        })
        .await
        .unwrap();
    assert_eq!(cache.index().len(), 3);

    let deleted = cache
        .invalidate(&history_spec("alice", "1"), &history_prefix("alice"), true)
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    // alice's entries are gone from store and index, bob's survive
    assert_eq!(cache.index().len(), 1);
    let key = history_spec("alice", "1").build().unwrap();
    assert!(!store.contains(key.as_str()));
    let bob_key = history_spec("bob", "1").build().unwrap();
    assert!(store.contains(bob_key.as_str()));
}

#[tokio::test]
async fn full_key_invalidation_removes_a_single_page() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    for page in ["1", "2"] {
        cache
            .get_or_compute(&history_spec("alice", page), None, || async {
                Ok(format!("page {page}"))
            })
            .await
            .unwrap();
    }

    // pin every attribute down to the page to hit exactly one key
    let values = history_prefix("alice")
        .headers(AttributeValue::Absent)
        .get(vec!["1"])
        .post(AttributeValue::Absent)
        .json(AttributeValue::Absent);
    let deleted = cache
        .invalidate(&history_spec("alice", "1"), &values, false)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(cache.index().len(), 1);
    assert!(cache
        .index()
        .contains(&history_spec("alice", "2").build().unwrap()));
}

#[tokio::test]
async fn non_recursive_invalidation_requires_a_complete_key() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    let err = cache
        .invalidate(&history_spec("alice", "1"), &history_prefix("alice"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::KeySpec(_)));
}

#[tokio::test]
async fn invalidating_an_unknown_prefix_deletes_nothing() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    cache
        .get_or_compute(&history_spec("alice", "1"), None, || async {
            Ok("page".to_string())
        })
        .await
        .unwrap();

    let deleted = cache
        .invalidate(&history_spec("alice", "1"), &history_prefix("carol"), true)
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(cache.index().len(), 1);
}

#[tokio::test]
async fn invalidate_all_is_idempotent() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    for user in ["alice", "bob"] {
        cache
            .get_or_compute(&history_spec(user, "1"), None, || async {
                Ok("page".to_string())
            })
            .await
            .unwrap();
    }

    assert_eq!(cache.invalidate_all().await.unwrap(), 2);
    assert_eq!(cache.invalidate_all().await.unwrap(), 0);
    assert!(cache.index().is_empty());
}

#[tokio::test]
async fn expired_entries_are_swept_from_the_index_on_read() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    let spec = history_spec("alice", "1");

    cache
        .get_or_compute(&spec, Some(Duration::from_millis(20)), || async {
            Ok("short lived".to_string())
        })
        .await
        .unwrap();
    assert_eq!(cache.index().len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // the read recomputes and the index never holds a second registration
    let (value, status) = cache
        .get_or_compute_with_status(&spec, None, || async { Ok("fresh".to_string()) })
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Miss);
    assert_eq!(value, "fresh");
    assert_eq!(cache.index().len(), 1);
}

#[tokio::test]
async fn hit_re_registers_a_key_the_index_lost() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    let spec = history_spec("alice", "1");

    cache
        .get_or_compute(&spec, None, || async { Ok("page".to_string()) })
        .await
        .unwrap();

    // a racing miss may sweep a key whose entry is still live; the next hit
    // must restore the registration so invalidation can still reach the entry
    let key = spec.build().unwrap();
    assert!(cache.index().remove(&key));
    assert!(cache.index().is_empty());

    let (value, status) = cache
        .get_or_compute_with_status(&spec, None, || async {
            panic!("entry is live, must not recompute")
        })
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(value, "page");
    assert!(cache.index().contains(&key));
}

#[tokio::test]
async fn deferred_invalidation_applies_at_next_lookup() {
    let store = Arc::new(MemoryStore::<String>::new());
    let cache = PathCache::new(store.clone());
    let spec = history_spec("alice", "1");

    cache
        .get_or_compute(&spec, None, || async { Ok("stale".to_string()) })
        .await
        .unwrap();

    let scheduled = cache
        .invalidate_deferred(&spec, &history_prefix("alice"))
        .unwrap();
    assert_eq!(scheduled, 1);

    // still cached until the next lookup comes through
    assert!(store.contains(spec.build().unwrap().as_str()));

    let (value, status) = cache
        .get_or_compute_with_status(&spec, None, || async { Ok("fresh".to_string()) })
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Miss);
    assert_eq!(value, "fresh");

    // the schedule is consumed, the fresh entry stays
    let (value, status) = cache
        .get_or_compute_with_status(&spec, None, || async {
            panic!("schedule must not re-trigger")
        })
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(value, "fresh");
}

#[tokio::test]
async fn all_attributes_omitted_invalidates_everything() {
    let cache = PathCache::new(MemoryStore::<String>::new());
    let mut bare = KeySpec::new();
    for attribute in Attribute::DEFAULT_ORDER {
        bare = bare.omit(attribute);
    }

    cache
        .get_or_compute(&bare, None, || async { Ok("everything".to_string()) })
        .await
        .unwrap();

    let deleted = cache
        .invalidate(&bare, &PrefixValues::new(), true)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(cache.index().is_empty());
}

#[tokio::test]
async fn concurrent_misses_leave_one_registration() {
    let cache = Arc::new(PathCache::new(MemoryStore::<String>::new()));
    let computed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let computed = computed.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_compute(&history_spec("alice", "1"), None, move || async move {
                    computed.fetch_add(1, Ordering::SeqCst);
                    Ok("computed".to_string())
                })
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), "computed");
    }

    // callers may race to compute (no single-flight), but the index ends with
    // exactly one registration for the key
    assert!(computed.load(Ordering::SeqCst) >= 1);
    assert_eq!(cache.index().len(), 1);
}

#[tokio::test]
async fn caches_json_response_bodies() {
    let cache = PathCache::new(MemoryStore::<serde_json::Value>::new());
    let spec = KeySpec::new()
        .path("/profile")
        .method("GET")
        .user("alice")
        .json(vec!["fields"]);

    let body = cache
        .get_or_compute(&spec, None, || async {
            Ok(serde_json::json!({"name": "alice", "plan": "pro"}))
        })
        .await
        .unwrap();

    let replayed = cache
        .get_or_compute(&spec, None, || async {
            panic!("must not recompute a cached entry")
        })
        .await
        .unwrap();
    assert_eq!(body, replayed);
    assert_eq!(replayed["plan"], "pro");
}

#[tokio::test]
async fn store_failures_propagate() {
    struct BrokenStore;

    #[async_trait::async_trait]
    impl CacheStore for BrokenStore {
        type Value = String;

        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::store("connection refused"))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::store("connection refused"))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::store("connection refused"))
        }
    }

    let cache = PathCache::new(BrokenStore);
    let err = cache
        .get_or_compute(&history_spec("alice", "1"), None, || async {
            Ok("never stored".to_string())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Store(_)));
}
