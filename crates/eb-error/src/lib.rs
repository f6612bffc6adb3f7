// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error utilities shared across the earthbuild crates.
//!
//! Two error shapes live here:
//!
//! - [`HintError`] — an error with one or more hints to be displayed after
//!   the message. The rendered form is `<message>:Hint: <hints>`, and
//!   [`HintError::from_error_text`] recovers that structure from a flat
//!   string (e.g. one that traveled through the build engine).
//! - [`ParamsError`] — a message + optional cause pair used by parameter
//!   parsing, where the caller wants to prepend context without losing the
//!   original error.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;

/// Marker separating an error message from its hints in rendered form.
const HINT_SEP: &str = ":Hint: ";

// ---------------------------------------------------------------------------
// HintError
// ---------------------------------------------------------------------------

/// An error that includes hints to be displayed after the error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintError {
    message: String,
    hints: Vec<String>,
}

impl HintError {
    /// Wrap an error message with one or more hints.
    pub fn wrap(message: impl Into<String>, first_hint: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hints: vec![first_hint.into()],
        }
    }

    /// Add another hint, displayed on its own line after the earlier ones.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    /// The error message without hints.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// All hints joined by newlines, with a trailing newline.
    #[must_use]
    pub fn hint(&self) -> String {
        if self.hints.is_empty() {
            return String::new();
        }
        let mut res = self.hints.join("\n");
        if !res.ends_with('\n') {
            res.push('\n');
        }
        res
    }

    /// Attempt to recover a `HintError` from a flat error string.
    ///
    /// Returns `None` when the text does not contain the hint marker or when
    /// either side of the marker is empty.
    #[must_use]
    pub fn from_error_text(text: &str) -> Option<Self> {
        let idx = text.find(HINT_SEP)?;
        let (message, rest) = text.split_at(idx);
        let hint = &rest[HINT_SEP.len()..];
        if message.is_empty() || hint.is_empty() {
            return None;
        }
        Some(Self {
            message: message.to_string(),
            hints: vec![hint.to_string()],
        })
    }
}

impl fmt::Display for HintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.message, HINT_SEP, self.hint())
    }
}

impl std::error::Error for HintError {}

// ---------------------------------------------------------------------------
// ParamsError
// ---------------------------------------------------------------------------

/// A parameter-parsing error: a message plus an optional underlying cause.
#[derive(Debug)]
pub struct ParamsError {
    msg: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ParamsError {
    /// Create a new error with the given message and no cause.
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            cause: None,
        }
    }

    /// Wrap a cause with a contextual message.
    pub fn wrap(
        cause: impl std::error::Error + Send + Sync + 'static,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            msg: msg.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The contextual message without the cause.
    #[must_use]
    pub fn parent_error(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.msg, cause),
            None => f.write_str(&self.msg),
        }
    }
}

impl std::error::Error for ParamsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
