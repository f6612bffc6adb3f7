// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interpreter errors with source locations.

use eb_ast::spec::SourceLocation;
use eb_error::HintError;
use std::fmt;

/// An error raised while interpreting a recipe.
///
/// Carries the source location of the offending command and, optionally, a
/// hint for the user. Errors are not recovered mid-recipe; they propagate
/// through the visited collection and cancel sibling conversions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterError {
    message: String,
    location: Option<SourceLocation>,
    hint: Option<String>,
}

impl InterpreterError {
    /// A new error at the given location.
    #[must_use]
    pub fn new(location: Option<&SourceLocation>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: location.cloned(),
            hint: None,
        }
    }

    /// A location-less error (resolution and orchestration failures).
    #[must_use]
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            hint: None,
        }
    }

    /// Attach a hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// The bare message, without location or hint.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The source location, if known.
    #[must_use]
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// The hint, if any.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Attempt to recover a located interpreter error from flat error text
    /// of the form `<file> line <line>:<col> <message>`.
    ///
    /// Engine errors sometimes carry interpreter messages verbatim; this
    /// restores their structure. Returns `None` when the text does not
    /// match.
    #[must_use]
    pub fn from_error_text(text: &str) -> Option<Self> {
        let marker = " line ";
        let idx = text.find(marker)?;
        let file = &text[..idx];
        if file.is_empty() {
            return None;
        }
        let rest = &text[idx + marker.len()..];
        let (line_str, rest) = rest.split_once(':')?;
        let line: usize = line_str.parse().ok()?;
        let col_end = rest.find(' ')?;
        let col: usize = rest[..col_end].parse().ok()?;
        let message = rest[col_end + 1..].trim();
        if message.is_empty() {
            return None;
        }
        let mut location = SourceLocation::line(file, line);
        location.start_column = col;
        location.end_column = col;
        Some(Self {
            message: message.to_string(),
            location: Some(location),
            hint: None,
        })
    }
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match &self.location {
            Some(loc) => format!("{loc} {}", self.message),
            None => self.message.clone(),
        };
        match &self.hint {
            Some(hint) => write!(f, "{}", HintError::wrap(base, hint.clone())),
            None => f.write_str(&base),
        }
    }
}

impl std::error::Error for InterpreterError {}

impl From<eb_vars::VarsError> for InterpreterError {
    fn from(err: eb_vars::VarsError) -> Self {
        Self::plain(err.to_string())
    }
}

impl From<eb_flag::FlagError> for InterpreterError {
    fn from(err: eb_flag::FlagError) -> Self {
        Self::plain(err.to_string())
    }
}

impl From<eb_vars::ExpandError> for InterpreterError {
    fn from(err: eb_vars::ExpandError) -> Self {
        Self::plain(err.to_string())
    }
}
