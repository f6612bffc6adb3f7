// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command-flag schemas and argument parsing.
//!
//! Every recipe command has a fixed set of long flags, declared as a static
//! table via [`command_opts!`]. The [`parse`] module consumes a command's
//! argument list against such a table: unknown flags produce a did-you-mean
//! suggestion, boolean flags accept `--flag=$VAR` values (expanded through a
//! caller-supplied modifier before parsing), and positional arguments are
//! preserved in order.
//!
//! Also here: quote/paren-aware token merging ([`quotes`]), parameter-group
//! parsing for `(+target --flag)` forms, and secret redaction for argv
//! logging ([`redact`]).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod opts;
pub mod parse;
pub mod quotes;
pub mod redact;
mod suggest;

use std::time::Duration;
use thiserror::Error;

pub use opts::*;
pub use parse::{
    ValueModifier, parse_arg_args, parse_args, parse_args_cleaned, parse_args_with_modifier,
    parse_key_value,
};
pub use quotes::{is_in_params_form, parse_load, parse_params, process_params_and_quotes, split_flag_values};
pub use redact::{redact_secrets, scrub_ansi_codes, scrub_credentials, scrub_credentials_all};

/// The value kinds a flag can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    /// `--flag` or `--flag=<bool>`.
    Bool,
    /// `--flag value` or `--flag=value`.
    Str,
    /// Repeatable `--flag value`.
    StrList,
    /// `--flag 30s`.
    Duration,
    /// `--flag 3`.
    Int,
}

/// One row of a command's static flag table.
#[derive(Debug, Clone, Copy)]
pub struct FlagSpec {
    /// Long flag name, without the `--` prefix. Empty for short-only flags.
    pub long: &'static str,
    /// Optional single-character short name.
    pub short: Option<char>,
    /// The value kind.
    pub kind: FlagKind,
}

/// Errors from flag parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlagError {
    /// The flag is not in the command's table. Carries a did-you-mean
    /// suggestion when a close name exists.
    #[error("{}", format_unknown(.command, .flag, .suggestion))]
    Unknown {
        /// The command whose table was searched.
        command: String,
        /// The unknown flag, as given (with dashes).
        flag: String,
        /// Closest known long name, if within edit distance.
        suggestion: Option<String>,
    },
    /// A non-boolean flag was given without a value.
    #[error("flag {flag} of {command} expects a value")]
    MissingValue {
        /// The command being parsed.
        command: String,
        /// The flag missing its value.
        flag: String,
    },
    /// A flag value failed to parse for its kind.
    #[error("invalid value {value:?} for flag {flag} of {command}")]
    InvalidValue {
        /// The command being parsed.
        command: String,
        /// The flag with the bad value.
        flag: String,
        /// The offending value.
        value: String,
    },
    /// Invalid `ARG`/`LET`/`SET` syntax.
    #[error("invalid syntax")]
    InvalidSyntax,
    /// A required ARG declared a default.
    #[error("required ARG cannot have a default value")]
    RequiredArgHasDefault,
    /// `--global` used outside the base recipe.
    #[error("global ARG can only be set in the base target")]
    GlobalArgNotInBase,
    /// An error reported by the caller's value-modifier callback.
    #[error("{0}")]
    Modifier(String),
}

fn format_unknown(command: &str, flag: &str, suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!("unknown flag {flag} in {command}. Did you mean '--{s}'?"),
        None => format!("unknown flag {flag} in {command}"),
    }
}

/// A command's flag schema: a static table plus typed setters.
///
/// Implemented by the structs in [`opts`], generated by [`command_opts!`].
pub trait CommandFlags: Default {
    /// The command name, for error messages.
    fn command_name() -> &'static str;
    /// The static flag table.
    fn flag_table() -> &'static [FlagSpec];
    /// Set a flag by long name. `value` is `None` for a bare boolean flag.
    fn set_flag(&mut self, long: &str, value: Option<&str>) -> Result<(), FlagError>;
    /// Render the non-default flags back to canonical `--flag[=value]` args.
    fn format_flags(&self) -> Vec<String>;
}

pub(crate) fn parse_bool_value(command: &str, flag: &str, value: &str) -> Result<bool, FlagError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Ok(true),
        "false" | "no" | "n" | "0" | "off" => Ok(false),
        _ => Err(FlagError::InvalidValue {
            command: command.to_string(),
            flag: flag.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parse a duration of the form `1h30m`, `30s`, `250ms`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut num = String::new();
    let mut chars = s.chars().peekable();
    let mut any = false;
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num.push(c);
            continue;
        }
        let unit = if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            "ms"
        } else {
            match c {
                'h' => "h",
                'm' => "m",
                's' => "s",
                _ => return None,
            }
        };
        let n: u64 = num.parse().ok()?;
        num.clear();
        any = true;
        total += match unit {
            "h" => Duration::from_secs(n * 3600),
            "m" => Duration::from_secs(n * 60),
            "s" => Duration::from_secs(n),
            _ => Duration::from_millis(n),
        };
    }
    if !num.is_empty() || !any {
        return None;
    }
    Some(total)
}

/// Render a duration in the same `1h30m`/`30s`/`250ms` notation.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    let mut secs = (ms / 1000) as u64;
    let rem_ms = (ms % 1000) as u64;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if mins > 0 {
        out.push_str(&format!("{mins}m"));
    }
    if secs > 0 {
        out.push_str(&format!("{secs}s"));
    }
    if rem_ms > 0 {
        out.push_str(&format!("{rem_ms}ms"));
    }
    out
}
