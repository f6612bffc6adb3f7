// SPDX-License-Identifier: MIT OR Apache-2.0
//! `$`-expansion of variables and shell-outs.
//!
//! Three forms are recognized: `$NAME`, `${NAME}`, and `$(command)`. The
//! last is a shell-out: it can only be resolved by running the command
//! against the current build state, so expansion is split in two —
//! [`parse_expansion`] produces segments, and the caller resolves
//! [`ExpandSegment::Shell`] segments itself. [`expand_strict`] and
//! [`expand_lenient`] cover the common no-shell-out case.

use eb_ast::is_valid_env_var_name;
use thiserror::Error;

/// Errors from expansion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpandError {
    /// A referenced variable has no value.
    #[error("unable to expand: {0} is not defined")]
    Unresolved(String),
    /// `$(…)` used where shell-outs cannot run.
    #[error("shell-out is not supported in this context: $({0})")]
    ShellOutUnsupported(String),
    /// Malformed expansion syntax.
    #[error("invalid expansion in {0:?}")]
    Invalid(String),
}

/// One piece of an expansion-parsed string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandSegment {
    /// Literal text.
    Literal(String),
    /// `$NAME` or `${NAME}`.
    Var(String),
    /// `$(command)`, to be run against the current build state.
    Shell(String),
}

/// Parse a string into literal, variable, and shell-out segments.
///
/// `\$` escapes a dollar sign. `$(…)` honors nested parentheses.
pub fn parse_expansion(input: &str) -> Result<Vec<ExpandSegment>, ExpandError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'$') {
            literal.push('$');
            chars.next();
            continue;
        }
        if c != '$' {
            literal.push(c);
            continue;
        }

        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(ExpandError::Invalid(input.to_string())),
                    }
                }
                flush(&mut segments, &mut literal);
                segments.push(ExpandSegment::Var(name));
            }
            Some('(') => {
                chars.next();
                let mut cmd = String::new();
                let mut depth = 1usize;
                loop {
                    match chars.next() {
                        Some('(') => {
                            depth += 1;
                            cmd.push('(');
                        }
                        Some(')') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            cmd.push(')');
                        }
                        Some(c) => cmd.push(c),
                        None => return Err(ExpandError::Invalid(input.to_string())),
                    }
                }
                flush(&mut segments, &mut literal);
                segments.push(ExpandSegment::Shell(cmd));
            }
            _ => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() || !is_valid_env_var_name(&name) {
                    // A lone `$` stays literal.
                    literal.push('$');
                    literal.push_str(&name);
                    continue;
                }
                flush(&mut segments, &mut literal);
                segments.push(ExpandSegment::Var(name));
            }
        }
    }

    flush(&mut segments, &mut literal);
    Ok(segments)
}

fn flush(segments: &mut Vec<ExpandSegment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(ExpandSegment::Literal(std::mem::take(literal)));
    }
}

/// Expand variables; unresolved names and shell-outs are errors.
pub fn expand_strict(
    input: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Result<String, ExpandError> {
    let mut out = String::with_capacity(input.len());
    for segment in parse_expansion(input)? {
        match segment {
            ExpandSegment::Literal(s) => out.push_str(&s),
            ExpandSegment::Var(name) => match lookup(&name) {
                Some(v) => out.push_str(&v),
                None => return Err(ExpandError::Unresolved(name)),
            },
            ExpandSegment::Shell(cmd) => {
                return Err(ExpandError::ShellOutUnsupported(cmd));
            }
        }
    }
    Ok(out)
}

/// Expand variables; unresolved names become empty strings. Used in
/// default-value positions, where a missing value is not an error.
pub fn expand_lenient(
    input: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Result<String, ExpandError> {
    let mut out = String::with_capacity(input.len());
    for segment in parse_expansion(input)? {
        match segment {
            ExpandSegment::Literal(s) => out.push_str(&s),
            ExpandSegment::Var(name) => {
                if let Some(v) = lookup(&name) {
                    out.push_str(&v);
                }
            }
            ExpandSegment::Shell(cmd) => {
                return Err(ExpandError::ShellOutUnsupported(cmd));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "FOO" => Some("foo-value".to_string()),
            "BAR" => Some("bar".to_string()),
            _ => None,
        }
    }

    #[test]
    fn plain_and_braced_variables() {
        assert_eq!(
            expand_strict("a $FOO b ${BAR}c", lookup).expect("expand"),
            "a foo-value b barc"
        );
    }

    #[test]
    fn unresolved_is_an_error_in_strict_mode() {
        let err = expand_strict("$MISSING", lookup).unwrap_err();
        assert_eq!(err, ExpandError::Unresolved("MISSING".to_string()));
    }

    #[test]
    fn unresolved_is_empty_in_lenient_mode() {
        assert_eq!(expand_lenient("x${MISSING}y", lookup).expect("expand"), "xy");
    }

    #[test]
    fn escaped_dollar_is_literal() {
        assert_eq!(expand_strict(r"cost \$5", lookup).expect("expand"), "cost $5");
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand_strict("a$ b", lookup).expect("expand"), "a$ b");
    }

    #[test]
    fn shell_out_segments_are_parsed() {
        let segments = parse_expansion("v=$(cat file | wc -l)").expect("parse");
        assert_eq!(
            segments,
            vec![
                ExpandSegment::Literal("v=".to_string()),
                ExpandSegment::Shell("cat file | wc -l".to_string()),
            ]
        );
    }

    #[test]
    fn shell_out_honors_nested_parens() {
        let segments = parse_expansion("$(echo $(date))").expect("parse");
        assert_eq!(
            segments,
            vec![ExpandSegment::Shell("echo $(date)".to_string())]
        );
    }

    #[test]
    fn shell_out_errors_in_simple_expansion() {
        let err = expand_strict("$(whoami)", lookup).unwrap_err();
        assert_eq!(
            err,
            ExpandError::ShellOutUnsupported("whoami".to_string())
        );
    }

    #[test]
    fn unterminated_forms_error() {
        assert!(parse_expansion("${unclosed").is_err());
        assert!(parse_expansion("$(unclosed").is_err());
    }
}
