// SPDX-License-Identifier: MIT OR Apache-2.0
//! Quote- and paren-aware token handling.

use crate::FlagError;

/// Rearranges a token slice according to quotes and parentheses.
///
/// Tokens containing an unterminated `"`, `'`, or `(` are joined with the
/// following tokens (space-separated) until the matching closer appears.
/// For example `["hello ", "wor(", "ld)"]` becomes `["hello ", "wor( ld)"]`.
#[must_use]
pub fn process_params_and_quotes(args: &[String]) -> Vec<String> {
    let mut open_quote: Option<char> = None;
    let mut buf = String::new();
    let mut merged: Vec<String> = Vec::with_capacity(args.len());

    for (i, arg) in args.iter().enumerate() {
        buf.push_str(arg);

        for ch in arg.chars() {
            match open_quote {
                None => {
                    if ch == '"' || ch == '\'' || ch == '(' {
                        open_quote = Some(ch);
                    }
                }
                Some(open) => {
                    let closes = (open == '"' && ch == '"')
                        || (open == '\'' && ch == '\'')
                        || (open == '(' && ch == ')');
                    if closes {
                        open_quote = None;
                    }
                }
            }
        }

        if open_quote.is_none() {
            merged.push(std::mem::take(&mut buf));
            continue;
        }

        // Unterminated quote: join up with the next token.
        if i < args.len() - 1 {
            buf.push(' ');
        }
    }

    if open_quote.is_some() {
        // Unterminated quote at the end of input.
        merged.push(buf);
    }

    merged
}

/// True if the string is a parenthesized parameter group, possibly wrapped
/// in escaped quotes: `(+target --flag)` or `"(+target --flag)"`.
#[must_use]
pub fn is_in_params_form(s: &str) -> bool {
    (s.starts_with("\"(") && s.ends_with(")\"")) || (s.starts_with('(') && s.ends_with(')'))
}

/// Splits `(+target --flag=something)` into `+target` and the extra args.
///
/// Honors double quotes and backslash escapes inside the group.
pub fn parse_params(s: &str) -> Result<(String, Vec<String>), FlagError> {
    if !is_in_params_form(s) {
        return Err(FlagError::Modifier("params atom not in ( ... )".to_string()));
    }

    let inner = if s.starts_with("\"(") {
        &s[2..s.len() - 2]
    } else {
        &s[1..s.len() - 1]
    };

    let mut parts: Vec<String> = Vec::new();
    let mut part = String::new();
    let mut next_escaped = false;
    let mut in_quotes = false;

    for ch in inner.chars() {
        match ch {
            '"' => {
                if !next_escaped {
                    in_quotes = !in_quotes;
                }
                next_escaped = false;
            }
            '\\' => {
                next_escaped = true;
            }
            ' ' | '\t' | '\n' => {
                if !in_quotes && !next_escaped {
                    if !part.is_empty() {
                        parts.push(std::mem::take(&mut part));
                    }
                    next_escaped = false;
                    continue;
                }
                next_escaped = false;
            }
            _ => {
                next_escaped = false;
            }
        }
        part.push(ch);
    }

    if next_escaped {
        return Err(FlagError::Modifier("unterminated escape sequence".to_string()));
    }
    if in_quotes {
        return Err(FlagError::Modifier("no ending quotes".to_string()));
    }
    if !part.is_empty() {
        parts.push(part);
    }
    if parts.is_empty() {
        return Err(FlagError::Modifier("invalid empty params".to_string()));
    }

    let first = parts.remove(0);
    Ok((first, parts))
}

/// Splits a `--load` value into image name, target, and extra args.
///
/// Example: `my-image=(+target --arg1 foo)` yields
/// `("my-image", "+target", ["--arg1", "foo"])`. A bare `<target>` form
/// leaves the image empty (it is inferred from the target's SAVE IMAGE).
pub fn parse_load(load: &str) -> Result<(String, String, Vec<String>), FlagError> {
    let mut image = String::new();
    let target_str;

    let mut words = load.splitn(2, ' ');
    let first_word = words.next().unwrap_or_default();
    match first_word.split_once('=') {
        None => {
            target_str = load.to_string();
        }
        Some((img, rest)) => {
            image = img.to_string();
            target_str = match words.next() {
                Some(tail) => format!("{rest} {tail}"),
                None => rest.to_string(),
            };
        }
    }

    if is_in_params_form(&target_str) {
        let (target, extra) = parse_params(&target_str)?;
        return Ok((image, target, extra));
    }
    Ok((image, target_str, Vec::new()))
}

/// Splits a multi-value flag string on spaces and commas, so that
/// `--platform "linux/amd64,linux/arm64"` and repeated `--platform` flags
/// produce the same list.
#[must_use]
pub fn split_flag_values(value: &str) -> Vec<String> {
    value
        .split([' ', ','])
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
