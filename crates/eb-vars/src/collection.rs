// SPDX-License-Identifier: MIT OR Apache-2.0
//! The layered variable collection used by the interpreter.

use crate::builtin::{DefaultArgs, builtin_args};
use crate::reserved;
use crate::scope::{Scope, ScopeOpts};
use eb_domain::{GitMetadata, Target};
use eb_features::Features;
use eb_platform::PlatformResolver;
use thiserror::Error;

/// Errors from variable declaration and assignment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarsError {
    /// Redeclaration in the same scope (under `arg-scope-and-set`).
    #[error("ARG {0} is already declared in this scope")]
    AlreadyDeclared(String),
    /// A required ARG got no value from the caller.
    #[error("value not supplied for required ARG {0}")]
    RequiredArgMissing(String),
    /// `SET` on a variable that was not declared with `LET`.
    #[error("unable to SET {0}: it was not declared with LET")]
    SetNonLet(String),
    /// The name is not a valid variable name.
    #[error("invalid variable name {0:?}")]
    InvalidName(String),
}

/// Everything needed to seed a [`Collection`] for one target conversion.
#[derive(Debug, Clone, Default)]
pub struct CollectionOpt {
    /// The target being converted.
    pub target: Target,
    /// Builtin values provided by the binary.
    pub builtin_args: DefaultArgs,
    /// Overriding args from the CLI or the calling target.
    pub overriding: Scope,
    /// Global args inherited from the base recipe of this file.
    pub globals: Scope,
    /// Git metadata of the build context, if any.
    pub git_meta: Option<GitMetadata>,
    /// Whether push mode is enabled.
    pub push: bool,
    /// Whether this is a CI run.
    pub ci: bool,
}

#[derive(Debug, Clone, Default)]
struct Frame {
    args: Scope,
    lets: Scope,
    overriding: Scope,
}

/// Layered scopes for one conversion: builtins, overrides, globals, envs,
/// and a frame per target/function invocation.
///
/// Builtins are not directly visible: a recipe sees a builtin's value only
/// after declaring it (`ARG EARTHLY_TARGET`).
#[derive(Debug, Clone)]
pub struct Collection {
    features: Features,
    builtin: Scope,
    globals: Scope,
    envs: Scope,
    frames: Vec<Frame>,
}

impl Collection {
    /// Create a collection seeded with builtin args for `opt.target`.
    #[must_use]
    pub fn new(ftrs: &Features, platr: &PlatformResolver, opt: CollectionOpt) -> Self {
        let builtin = builtin_args(
            &opt.target,
            platr,
            opt.git_meta.as_ref(),
            &opt.builtin_args,
            ftrs,
            opt.push,
            opt.ci,
        );
        Self {
            features: ftrs.clone(),
            builtin,
            globals: opt.globals,
            envs: Scope::new(),
            frames: vec![Frame {
                overriding: opt.overriding,
                ..Frame::default()
            }],
        }
    }

    fn frame(&self) -> &Frame {
        self.frames.last().expect("collection always has a frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("collection always has a frame")
    }

    /// The feature record this collection was created with.
    #[must_use]
    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Look up an active variable, innermost scope first.
    #[must_use]
    pub fn get_active(&self, name: &str) -> Option<String> {
        let frame = self.frame();
        frame
            .lets
            .get_active(name)
            .or_else(|| frame.args.get_active(name))
            .or_else(|| self.envs.get_active(name))
            .or_else(|| self.globals.get_active(name))
            .map(String::from)
    }

    /// True if the name is declared anywhere visible (active or not).
    #[must_use]
    pub fn is_declared(&self, name: &str) -> bool {
        let frame = self.frame();
        frame.lets.contains(name)
            || frame.args.contains(name)
            || self.envs.contains(name)
            || self.globals.contains(name)
    }

    /// Declare a build argument.
    ///
    /// The effective value comes from, in order: the builtin scope (for
    /// reserved names, unless `as_arg` is false under `arg-scope-and-set`),
    /// the caller's overriding args, then `default`. Returns the effective
    /// value.
    pub fn declare_arg(
        &mut self,
        name: &str,
        default: Option<&str>,
        required: bool,
        global: bool,
    ) -> Result<String, VarsError> {
        self.declare_var(name, default, required, global, true)
    }

    /// Declare a variable the `LET` way: builtins do not leak into it.
    pub fn declare_let(&mut self, name: &str, value: &str) -> Result<(), VarsError> {
        if !eb_ast::is_valid_env_var_name(name) {
            return Err(VarsError::InvalidName(name.to_string()));
        }
        if self.features.arg_scope_set && self.frame().lets.contains(name) {
            return Err(VarsError::AlreadyDeclared(name.to_string()));
        }
        self.frame_mut().lets.add_active(name, value);
        Ok(())
    }

    /// Declare a variable, choosing ARG or LET builtin semantics.
    pub fn declare_var(
        &mut self,
        name: &str,
        default: Option<&str>,
        required: bool,
        global: bool,
        as_arg: bool,
    ) -> Result<String, VarsError> {
        if !eb_ast::is_valid_env_var_name(name) {
            return Err(VarsError::InvalidName(name.to_string()));
        }
        if self.features.arg_scope_set && self.frame().args.contains(name) {
            return Err(VarsError::AlreadyDeclared(name.to_string()));
        }

        let use_builtin = reserved::is_builtin(name) && (as_arg || !self.features.arg_scope_set);
        let builtin_value = if use_builtin {
            self.builtin.get_active(name).map(String::from)
        } else {
            None
        };
        let overriding_value = self.frame().overriding.get_active(name).map(String::from);

        let value = match builtin_value.or(overriding_value) {
            Some(v) => Some(v),
            None => {
                if required {
                    return Err(VarsError::RequiredArgMissing(name.to_string()));
                }
                default.map(String::from)
            }
        };

        match value {
            Some(v) => {
                self.frame_mut().args.add_active(name, v.clone());
                if global {
                    self.globals.add_active(name, v.clone());
                }
                Ok(v)
            }
            None => {
                // Declared but not active.
                self.frame_mut().args.add(name, "", ScopeOpts::default());
                if global {
                    self.globals.add(name, "", ScopeOpts::default());
                }
                Ok(String::new())
            }
        }
    }

    /// Reassign a `LET` variable (`SET`).
    pub fn set_existing(&mut self, name: &str, value: &str) -> Result<(), VarsError> {
        // Search frames innermost-out: SET works on the nearest LET.
        for frame in self.frames.iter_mut().rev() {
            if frame.lets.contains(name) {
                frame.lets.add_active(name, value);
                return Ok(());
            }
        }
        Err(VarsError::SetNonLet(name.to_string()))
    }

    /// Declare an `ENV` variable, visible everywhere and exported to the
    /// image config.
    pub fn declare_env(&mut self, name: &str, value: &str) -> Result<(), VarsError> {
        if !eb_ast::is_valid_env_var_name(name) {
            return Err(VarsError::InvalidName(name.to_string()));
        }
        self.envs.add_active(name, value);
        Ok(())
    }

    /// Enter a function frame with its own overriding args.
    pub fn enter_frame(&mut self, overriding: Scope) {
        self.frames.push(Frame {
            overriding,
            ..Frame::default()
        });
    }

    /// Leave the innermost function frame. The base frame cannot be left.
    pub fn exit_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// The ENV scope, for the image config.
    #[must_use]
    pub fn envs(&self) -> &Scope {
        &self.envs
    }

    /// The global-arg scope, for seeding sibling target conversions.
    #[must_use]
    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    /// The overriding args of the current frame.
    #[must_use]
    pub fn overriding(&self) -> &Scope {
        &self.frame().overriding
    }

    /// Active args of the current frame (for `--pass-args`).
    #[must_use]
    pub fn frame_args(&self) -> &Scope {
        &self.frame().args
    }

    /// The builtin scope (not directly visible to recipes).
    #[must_use]
    pub fn builtins(&self) -> &Scope {
        &self.builtin
    }

    /// Overwrite a builtin value (`LOCALLY`, platform switches).
    pub fn set_builtin(&mut self, name: &str, value: &str) {
        self.builtin.add_active(name, value);
    }

    /// Sorted `(name, value)` pairs of the base overriding args, for
    /// fingerprinting.
    #[must_use]
    pub fn overriding_fingerprint(&self) -> Vec<(String, String)> {
        let base = &self.frames[0].overriding;
        base.as_map(ScopeOpts::active()).into_iter().collect()
    }
}
