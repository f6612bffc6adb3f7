// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loading of `.env` / `.arg` / `.secret` files.

use std::collections::BTreeMap;
use std::path::Path;

/// Parse an env-style file: `K=V` lines, `#` comments, blanks skipped.
///
/// A missing file yields an empty map; any other IO failure is an error.
pub fn load_env_file(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(anyhow::anyhow!("reading {}: {e}", path.display())),
    };
    parse_env_text(&text, &path.display().to_string())
}

fn parse_env_text(text: &str, origin: &str) -> anyhow::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            anyhow::bail!("{origin}:{}: expected K=V, got {line:?}", i + 1);
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("{origin}:{}: empty key", i + 1);
        }
        out.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(out)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_comments_and_quotes() {
        let parsed = parse_env_text(
            "# comment\nA=1\n\nB = two words \nC=\"quoted value\"\n",
            ".env",
        )
        .expect("parse");
        assert_eq!(parsed.get("A").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("B").map(String::as_str), Some("two words"));
        assert_eq!(parsed.get("C").map(String::as_str), Some("quoted value"));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_env_text("NOEQUALS\n", ".env").is_err());
        assert!(parse_env_text("=value\n", ".env").is_err());
    }

    #[test]
    fn missing_files_are_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parsed = load_env_file(&dir.path().join(".env")).expect("load");
        assert!(parsed.is_empty());
    }
}
