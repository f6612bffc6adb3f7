// SPDX-License-Identifier: MIT OR Apache-2.0
//! A flat variable scope with declared/active states.

use std::collections::BTreeMap;

/// Options for [`Scope::add`] and [`Scope::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeOpts {
    /// Consider (or mark) the value as active — bound in the current
    /// execution context, not merely declared.
    pub active: bool,
    /// For `add`: do not replace or activate an existing entry.
    pub no_override: bool,
}

impl ScopeOpts {
    /// Options selecting/marking active values.
    #[must_use]
    pub fn active() -> Self {
        Self {
            active: true,
            no_override: false,
        }
    }

    /// Add `no_override` to these options.
    #[must_use]
    pub fn no_override(mut self) -> Self {
        self.no_override = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    value: String,
    active: bool,
}

/// A name→value mapping where entries are declared and optionally active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    vars: BTreeMap<String, Entry>,
}

impl Scope {
    /// An empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or update) a variable. Returns false when `no_override` is set
    /// and the name already exists, in which case nothing changes.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>, opts: ScopeOpts) -> bool {
        let name = name.into();
        if opts.no_override && self.vars.contains_key(&name) {
            return false;
        }
        let active = opts.active
            || self
                .vars
                .get(&name)
                .is_some_and(|existing| existing.active);
        self.vars.insert(
            name,
            Entry {
                value: value.into(),
                active,
            },
        );
        true
    }

    /// Shorthand for [`add`](Self::add) with active marking.
    pub fn add_active(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        self.add(name, value, ScopeOpts::active())
    }

    /// Get a value. With `opts.active`, only active entries are returned.
    #[must_use]
    pub fn get(&self, name: &str, opts: ScopeOpts) -> Option<&str> {
        let entry = self.vars.get(name)?;
        if opts.active && !entry.active {
            return None;
        }
        Some(&entry.value)
    }

    /// Get any entry, declared or active.
    #[must_use]
    pub fn get_any(&self, name: &str) -> Option<&str> {
        self.get(name, ScopeOpts::default())
    }

    /// Get an active entry.
    #[must_use]
    pub fn get_active(&self, name: &str) -> Option<&str> {
        self.get(name, ScopeOpts::active())
    }

    /// True if the name is declared (active or not).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Remove an entry entirely.
    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }

    /// Sorted names, filtered by `opts.active` when set.
    #[must_use]
    pub fn sorted(&self, opts: ScopeOpts) -> Vec<String> {
        self.vars
            .iter()
            .filter(|(_, e)| !opts.active || e.active)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Name→value map, filtered by `opts.active` when set.
    #[must_use]
    pub fn as_map(&self, opts: ScopeOpts) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .filter(|(_, e)| !opts.active || e.active)
            .map(|(n, e)| (n.clone(), e.value.clone()))
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when no entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.vars.get(name)
    }
}

/// Combine scopes left-to-right: earlier scopes win on conflicts, except
/// that an active entry beats an inactive one regardless of position.
#[must_use]
pub fn combine_scopes(scopes: &[&Scope]) -> Scope {
    let mut out = Scope::new();
    // Inactive first pass, then active: later adds override only via the
    // active pass, preserving left preference within each class.
    for scope in scopes.iter().rev() {
        for name in scope.sorted(ScopeOpts::default()) {
            if let Some(entry) = scope.entry(&name)
                && !entry.active
            {
                out.add(name, entry.value.clone(), ScopeOpts::default());
            }
        }
    }
    for scope in scopes.iter().rev() {
        for name in scope.sorted(ScopeOpts::active()) {
            if let Some(entry) = scope.entry(&name) {
                out.add(name, entry.value.clone(), ScopeOpts::active());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_return_none() {
        let scope = Scope::new();
        assert!(scope.get_any("foo").is_none());
    }

    #[test]
    fn no_override_prevents_add_from_overriding() {
        let mut scope = Scope::new();
        scope.add("foo", "bar", ScopeOpts::default());
        let ok = scope.add("foo", "baz", ScopeOpts::active().no_override());
        assert!(!ok);
        assert_eq!(scope.get_any("foo"), Some("bar"));
        assert!(scope.get_active("foo").is_none());
    }

    #[test]
    fn sorted_names_with_and_without_active() {
        let mut scope = Scope::new();
        scope.add("a", "", ScopeOpts::active());
        scope.add("z", "", ScopeOpts::active());
        scope.add("e", "", ScopeOpts::default());
        scope.add("b", "", ScopeOpts::active());

        assert_eq!(scope.sorted(ScopeOpts::default()), vec!["a", "b", "e", "z"]);
        assert_eq!(scope.sorted(ScopeOpts::active()), vec!["a", "b", "z"]);
    }

    #[test]
    fn stores_inactive_and_active_values() {
        let mut scope = Scope::new();
        assert!(scope.add("foo", "bar", ScopeOpts::default()));
        assert!(scope.get_active("foo").is_none());
        assert!(!scope.add("foo", "bar", ScopeOpts::active().no_override()));
        assert!(scope.add("foo", "bar", ScopeOpts::active()));
        assert_eq!(scope.get_active("foo"), Some("bar"));

        let map = scope.as_map(ScopeOpts::active());
        assert_eq!(map.get("foo").map(String::as_str), Some("bar"));
    }

    #[test]
    fn activation_survives_value_updates() {
        let mut scope = Scope::new();
        scope.add("foo", "a", ScopeOpts::active());
        scope.add("foo", "b", ScopeOpts::default());
        assert_eq!(scope.get_active("foo"), Some("b"));
    }

    #[test]
    fn remove_then_add_resets_activation() {
        let mut scope = Scope::new();
        scope.add("foo", "bar", ScopeOpts::active());
        scope.remove("foo");
        scope.add("foo", "bar", ScopeOpts::default());
        assert!(scope.get_active("foo").is_none());
    }

    #[test]
    fn clone_preserves_entries() {
        let mut scope = Scope::new();
        scope.add("foo", "bar", ScopeOpts::active());
        let clone = scope.clone();
        assert_eq!(clone.get_active("foo"), Some("bar"));
    }

    #[test]
    fn combine_prefers_left_values() {
        let mut left = Scope::new();
        left.add("a", "b", ScopeOpts::default());
        let mut right = Scope::new();
        right.add("a", "c", ScopeOpts::default());

        let combined = combine_scopes(&[&left, &right]);
        assert_eq!(combined.get_any("a"), Some("b"));
    }

    #[test]
    fn combine_prefers_active_over_inactive() {
        let mut left = Scope::new();
        left.add("active", "b", ScopeOpts::default());
        let mut right = Scope::new();
        right.add("active", "d", ScopeOpts::active());

        let combined = combine_scopes(&[&left, &right]);
        assert_eq!(combined.get_any("active"), Some("d"));
    }
}
