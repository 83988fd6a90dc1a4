//! Hierarchical cache keys with prefix-indexed invalidation.
//!
//! This crate builds deterministic, structured cache keys from named request
//! attributes (path, method, user, header/query/form/body values) and keeps a
//! prefix index over them, so a caller can invalidate every entry sharing a
//! key prefix even though the backing store only supports exact-key
//! get/set/delete:
//!
//! - [`KeySpec`] - which attributes participate, in what order, and how each
//!   resolves (literal, lazy resolver, or omitted)
//! - [`PathIndex`] - prefix tree tracking every registered key
//! - [`PathCache`] - lookup-or-populate against a [`CacheStore`] plus
//!   prefix invalidation
//! - [`MemoryStore`] - in-process store for development and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use pathcache::{KeySpec, MemoryStore, PathCache, PrefixValues};
//!
//! let cache = PathCache::new(MemoryStore::<String>::new());
//!
//! let spec = KeySpec::new()
//!     .path("/messages")
//!     .method("GET")
//!     .user("alice")
//!     .get(vec!["page-1"]);
//!
//! // Populate on miss, replay on hit.
//! let body = cache
//!     .get_or_compute(&spec, None, || async { Ok(render_messages().await) })
//!     .await?;
//!
//! // Later: drop every cached page for alice in one call.
//! let dropped = cache
//!     .invalidate(
//!         &spec,
//!         &PrefixValues::new().path("/messages").method("GET").user("alice"),
//!         true,
//!     )
//!     .await?;
//! ```

mod coordinator;
mod error;
mod index;
mod key;
mod store;

pub use coordinator::{CacheStatus, PathCache};
pub use error::CacheError;
pub use index::PathIndex;
pub use key::{
    Attribute, AttributeResolver, AttributeSource, AttributeValue, FullKey, KeySpec, PrefixKey,
    PrefixValues, ABSENT_SEGMENT, KEY_SEPARATOR, ROOT_KEY,
};
pub use store::{CacheStore, MemoryStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Attribute, AttributeValue, CacheError, CacheStatus, CacheStore, KeySpec, MemoryStore,
        PathCache, PathIndex, PrefixValues,
    };
}
