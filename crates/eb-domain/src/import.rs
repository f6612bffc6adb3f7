// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tracking of `IMPORT <ref> AS <alias>` declarations.

use crate::reference::{ReferenceError, Target};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from import registration and dereferencing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportTrackerError {
    /// The import string could not be parsed as a frame.
    #[error("invalid import {0:?}")]
    InvalidImport(String),
    /// No alias was given and one could not be deduced from the import path.
    #[error("import {0:?} requires an explicit AS <alias>")]
    CannotDeduceAlias(String),
    /// The alias is empty or contains invalid characters.
    #[error("invalid import alias {0:?}")]
    InvalidAlias(String),
    /// The alias was already registered in this scope.
    #[error("import alias {0:?} is already in use")]
    DuplicateAlias(String),
    /// A reference used an alias that has not been imported.
    #[error("import alias {0:?} has not been declared")]
    UnknownAlias(String),
    /// Underlying reference error.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

#[derive(Debug, Clone)]
struct ImportEntry {
    frame: Target, // target name left empty; only the frame fields are used
    allow_privileged: bool,
    allow_privileged_set: bool,
}

/// The result of dereferencing an import-form reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerefedRef {
    /// The resolved reference. Its display form keeps the alias; its
    /// canonical form shows the resolved frame.
    pub target: Target,
    /// Whether the import was registered with `--allow-privileged`.
    pub allow_privileged: bool,
    /// Whether `--allow-privileged` was given at all.
    pub allow_privileged_set: bool,
}

/// Maps import aliases to their frames, with base-recipe (global) scoping.
#[derive(Debug, Default, Clone)]
pub struct ImportTracker {
    global: HashMap<String, ImportEntry>,
    local: HashMap<String, ImportEntry>,
}

impl ImportTracker {
    /// Create an empty tracker, optionally seeded with the global imports
    /// gathered while interpreting the base recipe.
    #[must_use]
    pub fn new(global: Option<&ImportTracker>) -> Self {
        Self {
            global: global.map(|g| g.global.clone()).unwrap_or_default(),
            local: HashMap::new(),
        }
    }

    /// Register an import. An empty `alias` deduces one from the last path
    /// segment of the import string (minus any `:tag` suffix).
    pub fn add(
        &mut self,
        import_str: &str,
        alias: &str,
        global: bool,
        allow_privileged: bool,
        allow_privileged_set: bool,
    ) -> Result<(), ImportTrackerError> {
        // Parse the frame by borrowing the target-reference syntax.
        let frame = Target::parse(&format!("{import_str}+x"))
            .map_err(|_| ImportTrackerError::InvalidImport(import_str.to_string()))?;
        if !frame.is_external() {
            return Err(ImportTrackerError::InvalidImport(import_str.to_string()));
        }

        let alias = if alias.is_empty() {
            deduce_alias(import_str)
                .ok_or_else(|| ImportTrackerError::CannotDeduceAlias(import_str.to_string()))?
        } else {
            alias.to_string()
        };
        if !is_valid_alias(&alias) {
            return Err(ImportTrackerError::InvalidAlias(alias));
        }

        let entry = ImportEntry {
            frame,
            allow_privileged,
            allow_privileged_set,
        };
        let scope = if global { &mut self.global } else { &mut self.local };
        if scope.contains_key(&alias) {
            return Err(ImportTrackerError::DuplicateAlias(alias));
        }
        scope.insert(alias, entry);
        Ok(())
    }

    /// Resolve an import-form reference to its full form.
    ///
    /// The returned target keeps `import_ref` set so that its display form
    /// still shows the alias, while the canonical form shows the resolved
    /// frame.
    pub fn deref(&self, reference: &Target) -> Result<DerefedRef, ImportTrackerError> {
        if !reference.is_import() {
            return Ok(DerefedRef {
                target: reference.clone(),
                allow_privileged: false,
                allow_privileged_set: false,
            });
        }
        let alias = &reference.import_ref;
        let entry = self
            .local
            .get(alias)
            .or_else(|| self.global.get(alias))
            .ok_or_else(|| ImportTrackerError::UnknownAlias(alias.clone()))?;

        let mut resolved = entry.frame.clone();
        resolved.target = reference.target.clone();
        resolved.import_ref = alias.clone();
        Ok(DerefedRef {
            target: resolved,
            allow_privileged: entry.allow_privileged,
            allow_privileged_set: entry.allow_privileged_set,
        })
    }
}

fn deduce_alias(import_str: &str) -> Option<String> {
    let base = import_str.rsplit('/').next()?;
    let base = base.split(':').next()?;
    if base.is_empty() || base == "." || base == ".." || !is_valid_alias(base) {
        return None;
    }
    Some(base.to_string())
}

fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Case {
        import_str: &'static str,
        alias: &'static str,
        reference: &'static str,
        expected: &'static str,
        ok: bool,
    }

    #[test]
    fn deref_resolves_registered_aliases() {
        let cases = [
            Case { import_str: "github.com/foo/bar", alias: "", reference: "bar+abc", expected: "github.com/foo/bar+abc", ok: true },
            Case { import_str: "github.com/foo/bar", alias: "buz", reference: "buz+abc", expected: "github.com/foo/bar+abc", ok: true },
            Case { import_str: "github.com/foo/bar", alias: "buz", reference: "bar+abc", expected: "", ok: false },
            Case { import_str: "github.com/foo/bar:v1.2.3", alias: "", reference: "bar+abc", expected: "github.com/foo/bar:v1.2.3+abc", ok: true },
            Case { import_str: "github.com/foo/bar:v1.2.3", alias: "buz", reference: "buz+abc", expected: "github.com/foo/bar:v1.2.3+abc", ok: true },
            Case { import_str: "github.com/foo/bar:v1.2.3", alias: "buz", reference: "bar+abc", expected: "", ok: false },
            Case { import_str: "./foo/bar", alias: "", reference: "bar+abc", expected: "./foo/bar+abc", ok: true },
            Case { import_str: "./foo/bar", alias: "buz", reference: "buz+abc", expected: "./foo/bar+abc", ok: true },
            Case { import_str: "./foo/bar", alias: "buz", reference: "bar+abc", expected: "", ok: false },
            Case { import_str: "../foo/bar", alias: "", reference: "bar+abc", expected: "../foo/bar+abc", ok: true },
            Case { import_str: "../foo/bar", alias: "buz", reference: "buz+abc", expected: "../foo/bar+abc", ok: true },
            Case { import_str: "../foo/bar", alias: "buz", reference: "bar+abc", expected: "", ok: false },
            Case { import_str: "/foo/bar", alias: "", reference: "bar+abc", expected: "/foo/bar+abc", ok: true },
            Case { import_str: "/foo/bar", alias: "buz", reference: "buz+abc", expected: "/foo/bar+abc", ok: true },
            Case { import_str: "/foo/bar", alias: "buz", reference: "bar+abc", expected: "", ok: false },
        ];

        for case in cases {
            let mut tracker = ImportTracker::default();
            tracker
                .add(case.import_str, case.alias, false, false, false)
                .expect("add import");

            let reference = Target::parse(case.reference).expect("parse test ref");
            assert_eq!(case.reference, reference.string());

            match tracker.deref(&reference) {
                Ok(derefed) => {
                    assert!(case.ok, "deref of {} should have failed", case.reference);
                    assert_eq!(case.expected, derefed.target.string_canonical());
                    assert_eq!(case.reference, derefed.target.string());
                }
                Err(_) => assert!(!case.ok, "deref of {} should have worked", case.reference),
            }
        }
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let mut tracker = ImportTracker::default();
        tracker.add("./a/lib", "", false, false, false).expect("add");
        let err = tracker.add("./b/lib", "", false, false, false).unwrap_err();
        assert_eq!(err, ImportTrackerError::DuplicateAlias("lib".to_string()));
    }

    #[test]
    fn global_imports_seed_new_trackers() {
        let mut base = ImportTracker::default();
        base.add("github.com/foo/bar", "", true, false, false)
            .expect("add global");

        let tracker = ImportTracker::new(Some(&base));
        let reference = Target::parse("bar+abc").expect("parse");
        let derefed = tracker.deref(&reference).expect("deref");
        assert_eq!(derefed.target.string_canonical(), "github.com/foo/bar+abc");
    }

    #[test]
    fn local_imports_do_not_leak_into_new_trackers() {
        let mut base = ImportTracker::default();
        base.add("github.com/foo/bar", "", false, false, false)
            .expect("add local");

        let tracker = ImportTracker::new(Some(&base));
        let reference = Target::parse("bar+abc").expect("parse");
        assert!(tracker.deref(&reference).is_err());
    }

    #[test]
    fn allow_privileged_is_carried_through_deref() {
        let mut tracker = ImportTracker::default();
        tracker
            .add("github.com/foo/bar", "", false, true, true)
            .expect("add");
        let derefed = tracker
            .deref(&Target::parse("bar+abc").expect("parse"))
            .expect("deref");
        assert!(derefed.allow_privileged);
        assert!(derefed.allow_privileged_set);
    }

    #[test]
    fn non_import_references_pass_through() {
        let tracker = ImportTracker::default();
        let reference = Target::parse("./x+y").expect("parse");
        let derefed = tracker.deref(&reference).expect("deref");
        assert_eq!(derefed.target, reference);
    }

    #[test]
    fn alias_cannot_be_deduced_from_bare_dots() {
        let mut tracker = ImportTracker::default();
        let err = tracker.add("..", "", false, false, false).unwrap_err();
        assert!(matches!(
            err,
            ImportTrackerError::InvalidImport(_) | ImportTrackerError::CannotDeduceAlias(_)
        ));
    }
}
