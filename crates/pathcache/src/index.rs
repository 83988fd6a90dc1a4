//! Prefix index over cache key segments.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::key::FullKey;

/// One segment position in the tree.
#[derive(Debug, Default)]
struct Node {
    /// Child nodes keyed by segment value. Matching is exact string equality.
    children: HashMap<String, Node>,
    /// Every full key stored at or beneath this node.
    keys: HashSet<FullKey>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.keys.is_empty()
    }
}

/// Prefix tree mapping key segments to the full keys cached beneath them.
///
/// The root represents the empty prefix, so its key set is every tracked key.
/// Invariant: a tracked key appears in the key set of every node along its
/// segment path, root included.
///
/// All operations take a single structure-wide lock, so a prefix walk always
/// observes a consistent snapshot under concurrent inserts and removals.
/// Constructed explicitly and shared via `Arc`; tests can instantiate
/// independent indexes.
#[derive(Debug, Default)]
pub struct PathIndex {
    root: Mutex<Node>,
}

impl PathIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key along its segment path. Idempotent.
    pub fn insert(&self, key: &FullKey) {
        let mut guard = self.root();
        let mut node = &mut *guard;
        node.keys.insert(key.clone());
        for segment in key.segments() {
            node = node.children.entry(segment.clone()).or_default();
            node.keys.insert(key.clone());
        }
    }

    /// Every tracked key whose segments start with `prefix`, sorted by key
    /// string. An unknown prefix yields an empty result, not an error; the
    /// empty prefix yields every tracked key.
    pub fn collect_under(&self, prefix: &[String]) -> Vec<FullKey> {
        let guard = self.root();
        let mut node = &*guard;
        for segment in prefix {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut keys: Vec<FullKey> = node.keys.iter().cloned().collect();
        keys.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    /// Unregister a key from every node along its path, pruning nodes left
    /// with no children and no keys. Returns whether the key was tracked.
    pub fn remove(&self, key: &FullKey) -> bool {
        let mut guard = self.root();
        remove_from(&mut guard, key.segments(), key)
    }

    /// Whether a key is currently tracked.
    pub fn contains(&self, key: &FullKey) -> bool {
        self.root().keys.contains(key)
    }

    /// Number of distinct tracked keys.
    pub fn len(&self) -> usize {
        self.root().keys.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.root().keys.is_empty()
    }

    fn root(&self) -> MutexGuard<'_, Node> {
        // No caller-supplied code runs under the lock, so a poisoned mutex can
        // only mean a panic in the allocator; the tree is still usable.
        self.root.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remove_from(node: &mut Node, segments: &[String], key: &FullKey) -> bool {
    let removed = node.keys.remove(key);
    if let Some((first, rest)) = segments.split_first() {
        if let Some(child) = node.children.get_mut(first) {
            remove_from(child, rest, key);
            if child.is_empty() {
                node.children.remove(first);
            }
        }
    }
    removed
}
