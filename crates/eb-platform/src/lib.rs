// SPDX-License-Identifier: MIT OR Apache-2.0
//! Platform parsing and resolution.
//!
//! Recipes can name platforms concretely (`linux/arm64/v8`) or through the
//! keywords `user` (the platform of the invoking host), `native` (the
//! platform of the build worker), and the empty string (the current default,
//! which propagates across target boundaries). The [`PlatformResolver`]
//! holds the concrete meaning of each keyword for one conversion.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from platform parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform string is not `os/arch[/variant]`.
    #[error("invalid platform {0:?}")]
    Invalid(String),
}

/// A concrete platform triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// Architecture, e.g. `amd64`.
    pub arch: String,
    /// Architecture variant, e.g. `v8`. Often empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
}

impl Platform {
    /// Construct a platform from parts.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            variant: String::new(),
        }
    }

    /// Parse an `os/arch[/variant]` string.
    pub fn parse(s: &str) -> Result<Self, PlatformError> {
        let mut parts = s.split('/');
        let (Some(os), Some(arch)) = (parts.next(), parts.next()) else {
            return Err(PlatformError::Invalid(s.to_string()));
        };
        let variant = parts.next().unwrap_or_default();
        if os.is_empty() || arch.is_empty() || parts.next().is_some() {
            return Err(PlatformError::Invalid(s.to_string()));
        }
        Ok(Self {
            os: os.to_string(),
            arch: arch.to_string(),
            variant: variant.to_string(),
        })
    }

    /// The platform of the host this process runs on, in docker notation.
    #[must_use]
    pub fn host() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(std::env::consts::OS, arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if !self.variant.is_empty() {
            write!(f, "/{}", self.variant)?;
        }
        Ok(())
    }
}

/// A platform as written in a recipe: a keyword or a concrete triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformSpec {
    /// The current default platform (propagates across target boundaries).
    #[default]
    Default,
    /// The platform of the invoking host.
    User,
    /// The platform of the build worker.
    Native,
    /// A concrete platform.
    Specific(Platform),
}

impl PlatformSpec {
    /// Parse a `--platform` value. Empty means the default.
    pub fn parse(s: &str) -> Result<Self, PlatformError> {
        match s {
            "" => Ok(Self::Default),
            "user" => Ok(Self::User),
            "native" => Ok(Self::Native),
            _ => Ok(Self::Specific(Platform::parse(s)?)),
        }
    }
}

/// Resolves platform keywords for one conversion, and carries the current
/// default across target boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformResolver {
    user: Platform,
    native: Platform,
    default_spec: PlatformSpec,
    current: PlatformSpec,
}

impl PlatformResolver {
    /// Create a resolver with the given meanings for `native` and `user`.
    #[must_use]
    pub fn new(native: Platform, user: Platform) -> Self {
        Self {
            user,
            native,
            default_spec: PlatformSpec::Default,
            current: PlatformSpec::Default,
        }
    }

    /// The platform of the invoking host.
    #[must_use]
    pub fn user_platform(&self) -> &Platform {
        &self.user
    }

    /// The platform of the build worker.
    #[must_use]
    pub fn native_platform(&self) -> &Platform {
        &self.native
    }

    /// The current platform spec, unresolved.
    #[must_use]
    pub fn current(&self) -> &PlatformSpec {
        &self.current
    }

    /// Set the current platform (e.g. from `FROM --platform=…`).
    pub fn update_platform(&mut self, spec: PlatformSpec) {
        self.current = spec;
    }

    /// Set what the default keyword resolves to for this conversion.
    pub fn set_default(&mut self, spec: PlatformSpec) {
        self.default_spec = spec;
    }

    /// Resolve a spec to a concrete platform.
    #[must_use]
    pub fn materialize(&self, spec: &PlatformSpec) -> Platform {
        match spec {
            PlatformSpec::Default => match &self.default_spec {
                // The default of the default is the native platform.
                PlatformSpec::Default => self.native.clone(),
                other => self.materialize(&other.clone()),
            },
            PlatformSpec::User => self.user.clone(),
            PlatformSpec::Native => self.native.clone(),
            PlatformSpec::Specific(p) => p.clone(),
        }
    }

    /// Resolve the current spec to a concrete platform.
    #[must_use]
    pub fn current_platform(&self) -> Platform {
        self.materialize(&self.current.clone())
    }

    /// A resolver for a child target: the child's default is the parent's
    /// current platform, unless the caller gave an explicit `--platform`.
    #[must_use]
    pub fn sub_resolver(&self, explicit: Option<&PlatformSpec>) -> Self {
        let mut sub = Self::new(self.native.clone(), self.user.clone());
        match explicit {
            Some(spec) => {
                let concrete = self.materialize(spec);
                sub.default_spec = PlatformSpec::Specific(concrete.clone());
                sub.current = PlatformSpec::Specific(concrete);
            }
            None => {
                sub.default_spec = self.current.clone();
            }
        }
        sub
    }
}
