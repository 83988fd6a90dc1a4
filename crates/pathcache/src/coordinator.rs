//! Cache coordination: lookup-or-populate and prefix invalidation.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::index::PathIndex;
use crate::key::{FullKey, KeySpec, PrefixValues};
use crate::store::CacheStore;

/// TTL applied when a call site passes none.
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from the store.
    Hit,
    /// Computed and stored.
    Miss,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
        }
    }
}

/// Coordinates the key builder, the prefix index and the backing store.
///
/// One instance per process, shared by all concurrent callers. Lookups
/// register keys in the [`PathIndex`]; invalidation asks the index for every
/// key under a prefix and deletes each one from the store, so a whole subtree
/// can be dropped without enumerating full keys.
///
/// Concurrent misses on the same key are not deduplicated: callers may race
/// to compute and the last write wins. Callers needing at-most-once
/// computation should layer their own single-flight on top.
pub struct PathCache<S: CacheStore> {
    store: S,
    index: Arc<PathIndex>,
    default_ttl: Duration,
    /// Keys scheduled for deletion at their next lookup.
    deferred: Mutex<HashSet<String>>,
}

impl<S: CacheStore> PathCache<S> {
    /// Create a coordinator with its own index and a 60 second default TTL.
    pub fn new(store: S) -> Self {
        Self {
            store,
            index: Arc::new(PathIndex::new()),
            default_ttl: DEFAULT_TTL,
            deferred: Mutex::new(HashSet::new()),
        }
    }

    /// Set the TTL used when `get_or_compute` receives none.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Use an externally constructed index, e.g. one shared with another
    /// coordinator over the same store.
    pub fn with_index(mut self, index: Arc<PathIndex>) -> Self {
        self.index = index;
        self
    }

    /// The prefix index tracking every key this coordinator has registered.
    pub fn index(&self) -> &Arc<PathIndex> {
        &self.index
    }

    /// Look up the key described by `spec`; on a miss, run `compute`, store
    /// its value with `ttl` (or the default), and register the key.
    ///
    /// `compute` runs outside any index lock. Resolver failures abort before
    /// any store interaction; store failures propagate unchanged.
    pub async fn get_or_compute<F, Fut>(
        &self,
        spec: &KeySpec,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<S::Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S::Value, CacheError>>,
    {
        self.get_or_compute_with_status(spec, ttl, compute)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), also reporting whether
    /// the value came from the store.
    pub async fn get_or_compute_with_status<F, Fut>(
        &self,
        spec: &KeySpec,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<(S::Value, CacheStatus), CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S::Value, CacheError>>,
    {
        let key = spec.build()?;

        if self.take_deferred(key.as_str()) {
            debug!(key = %key, "key was scheduled for deletion, dropping entry");
            self.store.delete(key.as_str()).await?;
            self.index.remove(&key);
        }

        if let Some(value) = self.store.get(key.as_str()).await? {
            debug!(key = %key, status = %CacheStatus::Hit, "cache lookup");
            // Keep the invariant that every stored key is indexed, even if the
            // entry outlived a process that originally registered it.
            self.index.insert(&key);
            return Ok((value, CacheStatus::Hit));
        }

        // A miss for a key the index still tracks means the backend entry
        // expired under us; drop the registration so the index cannot grow
        // without bound over the process lifetime. This can race a concurrent
        // writer that stored the same key between our get and this remove,
        // briefly leaving its live entry unindexed; the hit path above
        // re-registers the key on the next lookup.
        if self.index.remove(&key) {
            debug!(key = %key, "swept expired key from index");
        }

        debug!(key = %key, status = %CacheStatus::Miss, "cache lookup");
        let value = compute().await?;
        self.store
            .set(key.as_str(), value.clone(), ttl.unwrap_or(self.default_ttl))
            .await?;
        self.index.insert(&key);
        Ok((value, CacheStatus::Miss))
    }

    /// Delete cached entries under the prefix pinned by `values`.
    ///
    /// Recursive: every key sharing the prefix. Non-recursive: exactly the
    /// one key the values name, which requires a value for every attribute in
    /// the spec. Returns the number of keys deleted; `0` means nothing
    /// matched and is not an error.
    pub async fn invalidate(
        &self,
        spec: &KeySpec,
        values: &PrefixValues,
        recursive: bool,
    ) -> Result<u64, CacheError> {
        let prefix = spec.build_prefix(values)?;

        let keys = if recursive {
            self.index.collect_under(prefix.segments())
        } else {
            if !prefix.is_complete() {
                return Err(CacheError::KeySpec(
                    "non-recursive invalidation requires a value for every attribute".into(),
                ));
            }
            let key = prefix.into_full_key();
            if self.index.contains(&key) {
                vec![key]
            } else {
                Vec::new()
            }
        };

        self.delete_keys(keys).await
    }

    /// Delete every tracked entry.
    pub async fn invalidate_all(&self) -> Result<u64, CacheError> {
        let keys = self.index.collect_under(&[]);
        self.delete_keys(keys).await
    }

    /// Schedule every key under the prefix for deletion at its next lookup.
    ///
    /// Entries are written after the wrapped call returns, so a handler cannot
    /// synchronously invalidate the entry its own response is about to
    /// refresh; deferring the deletion to the next lookup covers that case.
    /// Returns the number of keys scheduled.
    pub fn invalidate_deferred(
        &self,
        spec: &KeySpec,
        values: &PrefixValues,
    ) -> Result<u64, CacheError> {
        let prefix = spec.build_prefix(values)?;
        let keys = self.index.collect_under(prefix.segments());
        let mut deferred = self.deferred();
        for key in &keys {
            deferred.insert(key.as_str().to_string());
        }
        Ok(keys.len() as u64)
    }

    async fn delete_keys(&self, keys: Vec<FullKey>) -> Result<u64, CacheError> {
        // A key deleted here no longer needs its delete-on-next-lookup mark;
        // dropping the marks keeps the deferred set from outliving the keys.
        {
            let mut deferred = self.deferred();
            for key in &keys {
                deferred.remove(key.as_str());
            }
        }

        let mut deleted = 0u64;
        for key in keys {
            // Store first, index second: an index entry without a store entry
            // is a harmless extra delete later, the reverse would strand the
            // stored value beyond the reach of any future invalidation.
            self.store.delete(key.as_str()).await?;
            self.index.remove(&key);
            deleted += 1;
        }
        debug!(deleted, "invalidated cache keys");
        Ok(deleted)
    }

    fn take_deferred(&self, key: &str) -> bool {
        self.deferred().remove(key)
    }

    fn deferred(&self) -> MutexGuard<'_, HashSet<String>> {
        self.deferred
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PrefixValues;
    use crate::store::MemoryStore;

    fn profile_spec(user: &str) -> KeySpec {
        KeySpec::new().path("/profile").method("GET").user(user)
    }

    #[tokio::test]
    async fn test_invalidate_drops_deferred_marks() {
        let cache = PathCache::new(MemoryStore::<String>::new());
        let spec = profile_spec("alice");

        cache
            .get_or_compute(&spec, None, || async { Ok("profile".to_string()) })
            .await
            .unwrap();
        cache
            .invalidate_deferred(&spec, &PrefixValues::new().path("/profile"))
            .unwrap();
        assert_eq!(cache.deferred().len(), 1);

        // the deferred mark dies with the key it was scheduled for
        let deleted = cache
            .invalidate(&spec, &PrefixValues::new().path("/profile"), true)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(cache.deferred().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_all_drops_deferred_marks() {
        let cache = PathCache::new(MemoryStore::<String>::new());
        for user in ["alice", "bob"] {
            cache
                .get_or_compute(&profile_spec(user), None, || async {
                    Ok("profile".to_string())
                })
                .await
                .unwrap();
        }
        cache
            .invalidate_deferred(&profile_spec("alice"), &PrefixValues::new())
            .unwrap();
        assert_eq!(cache.deferred().len(), 2);

        cache.invalidate_all().await.unwrap();
        assert!(cache.deferred().is_empty());
    }
}
