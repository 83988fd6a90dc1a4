//! Backend store boundary and the in-process implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::CacheError;

/// Exact-key value store with per-entry TTL.
///
/// Keys are opaque strings; implementations must not truncate them or
/// reinterpret the `/` separator. TTL enforcement belongs to the store: an
/// expired entry simply reads back as `None`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The cached value type.
    type Value: Clone + Send + Sync + 'static;

    /// Fetch a live entry. `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<Self::Value>, CacheError>;

    /// Store a value. A zero TTL means the entry never expires.
    async fn set(&self, key: &str, value: Self::Value, ttl: Duration) -> Result<(), CacheError>;

    /// Delete an entry. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<S: CacheStore + ?Sized> CacheStore for std::sync::Arc<S> {
    type Value = S::Value;

    async fn get(&self, key: &str) -> Result<Option<Self::Value>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Self::Value, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        (**self).delete(key).await
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process store for development and tests.
///
/// Expired entries are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemoryStore<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> MemoryStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries().values().filter(|e| !e.is_expired()).count()
    }

    /// Whether the store holds no live entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries().get(key).is_some_and(|e| !e.is_expired())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheStore for MemoryStore<V> {
    type Value = V;

    async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|e| e.is_expired()) {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = (ttl > Duration::ZERO).then(|| Instant::now() + ttl);
        self.entries()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("a/b", 42u32, Duration::ZERO).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Some(42));
        assert_eq!(store.get("a/c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let store = MemoryStore::new();
        store
            .set("k", "v".to_string(), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.contains("k"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("k", 1u8, Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", 1u8, Duration::ZERO).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_with_separators_stay_distinct() {
        let store = MemoryStore::new();
        store.set("a/b/c", 1u8, Duration::ZERO).await.unwrap();
        store.set("a/b", 2u8, Duration::ZERO).await.unwrap();
        assert_eq!(store.get("a/b/c").await.unwrap(), Some(1));
        assert_eq!(store.get("a/b").await.unwrap(), Some(2));
    }
}
