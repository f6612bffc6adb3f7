// SPDX-License-Identifier: MIT OR Apache-2.0
//! The build-file AST and a line-oriented parser for it.
//!
//! The AST ([`spec`]) is the contract between the parser and the
//! interpreter: commands are *not* interpreted at parse time — a
//! [`spec::Command`] is just a name, its raw argument tokens, and a source
//! location. The parser ([`parser`]) understands the block structure
//! (`IF`/`FOR`/`TRY`/`WAIT`/`WITH DOCKER` … `END`), quoting, comments, and
//! line continuations, and maps common mistakes to hint-carrying errors.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod parser;
pub mod spec;

pub use parser::{ParseError, parse_file, parse_str};

/// True if `name` is valid as an environment variable / ARG name.
///
/// The first character must be a letter or `_`; the rest letters, digits,
/// or `_`.
#[must_use]
pub fn is_valid_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_names() {
        assert!(is_valid_env_var_name("FOO"));
        assert!(is_valid_env_var_name("_private"));
        assert!(is_valid_env_var_name("A1_b2"));
        assert!(!is_valid_env_var_name(""));
        assert!(!is_valid_env_var_name("1ABC"));
        assert!(!is_valid_env_var_name("A-B"));
        assert!(!is_valid_env_var_name("A B"));
    }
}
