// SPDX-License-Identifier: MIT OR Apache-2.0
//! A keyed single-flight cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Collapses concurrent computations of the same key into one.
///
/// The first caller of [`do_call`](Self::do_call) for a key runs the
/// computation; concurrent callers for the same key wait and share the
/// cached value. A failed computation is not cached — the next caller
/// retries.
pub struct SyncCache<K, V> {
    entries: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for SyncCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SyncCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached value for `key`, computing it with `init` if needed.
    pub async fn do_call<E, F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut entries = self.entries.lock().expect("entries lock poisoned");
            Arc::clone(entries.entry(key).or_default())
        };
        cell.get_or_try_init(init).await.cloned()
    }

    /// The value for `key`, if it has already been computed.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().expect("entries lock poisoned");
        entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of keys with a completed value.
    #[must_use]
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().expect("entries lock poisoned");
        entries.values().filter(|cell| cell.get().is_some()).count()
    }

    /// True if no key has a completed value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
