// SPDX-License-Identifier: MIT OR Apache-2.0
//! The visited-targets collection.

use crate::starget::{SingleTarget, StatesError};
use eb_domain::Target;
use eb_platform::Platform;
use eb_vars::{Scope, ScopeOpts};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The deduplication key for one target conversion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// Canonical target reference.
    pub target: String,
    /// Platform string.
    pub platform: String,
    /// Whether privileged operations are allowed.
    pub allow_privileged: bool,
    /// Name-sorted overriding-args fingerprint, or the upfront input-graph
    /// hash under `use-visited-upfront-hash-collection`.
    pub args_fingerprint: String,
}

impl StateKey {
    /// Compute the key for a conversion.
    #[must_use]
    pub fn new(
        target: &Target,
        platform: &Platform,
        allow_privileged: bool,
        overriding: &Scope,
    ) -> Self {
        let mut fingerprint = String::new();
        for (name, value) in overriding.as_map(ScopeOpts::active()) {
            fingerprint.push_str(&name);
            fingerprint.push('=');
            fingerprint.push_str(&value);
            fingerprint.push('\0');
        }
        Self {
            target: target.string_canonical(),
            platform: platform.to_string(),
            allow_privileged,
            args_fingerprint: fingerprint,
        }
    }

    /// A key whose fingerprint is a precomputed input-graph hash.
    #[must_use]
    pub fn with_upfront_hash(
        target: &Target,
        platform: &Platform,
        allow_privileged: bool,
        hash: &str,
    ) -> Self {
        Self {
            target: target.string_canonical(),
            platform: platform.to_string(),
            allow_privileged,
            args_fingerprint: format!("hash:{hash}"),
        }
    }

    /// Compact display form for diagnostics.
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{} [{}] privileged={} args={}",
            self.target,
            self.platform,
            self.allow_privileged,
            self.args_fingerprint.replace('\0', ",")
        )
    }
}

/// Deduplicates concurrent conversions of the same key.
///
/// The internal mutex guards only the map; the conversion itself runs
/// outside the lock.
#[derive(Default)]
pub struct VisitedCollection {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<StateKey, Arc<SingleTarget>>,
    order: Vec<Arc<SingleTarget>>,
}

impl VisitedCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the entry for a key.
    ///
    /// Returns the entry and whether it is new. A new entry is *pending*:
    /// the caller must convert the target and `complete`/`fail` the entry.
    /// An existing entry is shared; observe it via its subject.
    ///
    /// `chain` is the caller's active dependency chain; a key already on it
    /// is a cycle.
    pub fn add(
        &self,
        target: &Target,
        platform: &Platform,
        allow_privileged: bool,
        overriding: &Scope,
        chain: &[StateKey],
    ) -> Result<(Arc<SingleTarget>, bool), StatesError> {
        let key = StateKey::new(target, platform, allow_privileged, overriding);
        self.add_keyed(key, target, platform, allow_privileged, chain)
    }

    /// Like [`add`](Self::add), with an explicit key (used under
    /// `use-visited-upfront-hash-collection`).
    pub fn add_keyed(
        &self,
        key: StateKey,
        target: &Target,
        platform: &Platform,
        allow_privileged: bool,
        chain: &[StateKey],
    ) -> Result<(Arc<SingleTarget>, bool), StatesError> {
        if chain.contains(&key) {
            let mut cycle: Vec<String> = chain.iter().map(|k| k.target.clone()).collect();
            cycle.push(key.target.clone());
            return Err(StatesError::Cycle(cycle));
        }

        let mut inner = self.inner.lock().expect("visited lock poisoned");
        if let Some(existing) = inner.entries.get(&key) {
            debug!(target: "eb.states", key = %key.display(), "visited hit");
            return Ok((Arc::clone(existing), false));
        }

        let entry = Arc::new(SingleTarget::new(
            target.clone(),
            platform.clone(),
            allow_privileged,
            key.display(),
        ));
        inner.entries.insert(key, Arc::clone(&entry));
        inner.order.push(Arc::clone(&entry));
        debug!(target: "eb.states", key = %entry.key, "visited insert");
        Ok((entry, true))
    }

    /// Snapshot of all entries, in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<SingleTarget>> {
        self.inner.lock().expect("visited lock poisoned").order.clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("visited lock poisoned").order.len()
    }

    /// True when no targets have been visited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::starget::TargetOutputs;
    use eb_sync::CancelToken;

    fn args(pairs: &[(&str, &str)]) -> Scope {
        let mut scope = Scope::new();
        for (k, v) in pairs {
            scope.add_active(*k, *v);
        }
        scope
    }

    fn platform() -> Platform {
        Platform::new("linux", "amd64")
    }

    #[test]
    fn first_add_is_new_second_is_shared() {
        let coll = VisitedCollection::new();
        let target = Target::parse("+build").expect("target");

        let (a, is_new_a) = coll
            .add(&target, &platform(), false, &Scope::new(), &[])
            .expect("add");
        assert!(is_new_a);

        let (b, is_new_b) = coll
            .add(&target, &platform(), false, &Scope::new(), &[])
            .expect("add");
        assert!(!is_new_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(coll.len(), 1);
    }

    #[test]
    fn key_covers_platform_privileged_and_args() {
        let coll = VisitedCollection::new();
        let target = Target::parse("+build").expect("target");

        coll.add(&target, &platform(), false, &Scope::new(), &[])
            .expect("add");
        let (_, new_platform) = coll
            .add(&target, &Platform::new("linux", "arm64"), false, &Scope::new(), &[])
            .expect("add");
        assert!(new_platform);

        let (_, new_privileged) = coll
            .add(&target, &platform(), true, &Scope::new(), &[])
            .expect("add");
        assert!(new_privileged);

        let (_, new_args) = coll
            .add(&target, &platform(), false, &args(&[("a", "1")]), &[])
            .expect("add");
        assert!(new_args);
        assert_eq!(coll.len(), 4);
    }

    #[test]
    fn args_fingerprint_is_order_insensitive() {
        let coll = VisitedCollection::new();
        let target = Target::parse("+build").expect("target");

        coll.add(
            &target,
            &platform(),
            false,
            &args(&[("b", "2"), ("a", "1")]),
            &[],
        )
        .expect("add");
        let (_, is_new) = coll
            .add(
                &target,
                &platform(),
                false,
                &args(&[("a", "1"), ("b", "2")]),
                &[],
            )
            .expect("add");
        assert!(!is_new, "same args in a different order share the entry");
    }

    #[test]
    fn cycles_are_detected_from_the_chain() {
        let coll = VisitedCollection::new();
        let a = Target::parse("+a").expect("target");
        let b = Target::parse("+b").expect("target");

        let key_a = StateKey::new(&a, &platform(), false, &Scope::new());
        let key_b = StateKey::new(&b, &platform(), false, &Scope::new());

        let err = coll
            .add(&a, &platform(), false, &Scope::new(), &[key_a.clone(), key_b])
            .unwrap_err();
        let StatesError::Cycle(cycle) = err else {
            panic!("expected cycle error");
        };
        assert_eq!(cycle, vec!["+a", "+b", "+a"]);
    }

    #[tokio::test]
    async fn concurrent_adds_share_one_new_entry() {
        let coll = Arc::new(VisitedCollection::new());
        let target = Target::parse("+build").expect("target");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coll = Arc::clone(&coll);
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                coll.add(&target, &Platform::new("linux", "amd64"), false, &Scope::new(), &[])
            }));
        }

        let mut new_count = 0;
        let mut entries = Vec::new();
        for handle in handles {
            let (entry, is_new) = handle.await.expect("join").expect("add");
            if is_new {
                new_count += 1;
            }
            entries.push(entry);
        }
        assert_eq!(new_count, 1, "exactly one caller sees is_new");
        for entry in &entries {
            assert!(Arc::ptr_eq(entry, &entries[0]));
        }
    }

    #[tokio::test]
    async fn waiters_share_the_creators_result() {
        let coll = Arc::new(VisitedCollection::new());
        let target = Target::parse("+build").expect("target");

        let (entry, is_new) = coll
            .add(&target, &platform(), false, &Scope::new(), &[])
            .expect("add");
        assert!(is_new);

        let waiter_entry = Arc::clone(&entry);
        let waiter = tokio::spawn(async move {
            waiter_entry.wait(&CancelToken::new()).await
        });

        tokio::task::yield_now().await;
        entry.complete(TargetOutputs {
            project: Some(("org".to_string(), "p".to_string())),
            ..TargetOutputs::default()
        });

        let outputs = waiter.await.expect("join").expect("wait");
        assert_eq!(outputs.project.as_ref().map(|p| p.0.as_str()), Some("org"));
    }

    #[test]
    fn upfront_hash_keys_differ_from_args_keys() {
        let coll = VisitedCollection::new();
        let target = Target::parse("+build").expect("target");

        coll.add(&target, &platform(), false, &Scope::new(), &[])
            .expect("add");
        let key = StateKey::with_upfront_hash(&target, &platform(), false, "abc123");
        let (_, is_new) = coll
            .add_keyed(key, &target, &platform(), false, &[])
            .expect("add keyed");
        assert!(is_new);
    }
}
