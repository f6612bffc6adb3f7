// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ignore-file resolution.

use std::path::Path;
use thiserror::Error;

/// `.earthignore` — the preferred ignore file.
pub const EARTH_IGNORE_FILE: &str = ".earthignore";
/// `.earthbuildignore` — the alternate ignore file.
pub const EARTHBUILD_IGNORE_FILE: &str = ".earthbuildignore";
/// `.dockerignore` — fallback under the `use-docker-ignore` feature.
pub const DOCKER_IGNORE_FILE: &str = ".dockerignore";

/// Errors from ignore-file resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExcludesError {
    /// Both alternate ignore files exist.
    #[error("both .earthignore and .earthbuildignore exist - please remove one")]
    DuplicateIgnoreFile,
    /// An ignore file could not be read.
    #[error("read {path}: {reason}")]
    Read {
        /// Path of the unreadable file.
        path: String,
        /// IO error text.
        reason: String,
    },
}

/// Patterns excluded from every local build context, unless the
/// `no-implicit-ignore` feature is set.
#[must_use]
pub fn implicit_excludes() -> Vec<String> {
    [
        ".tmp-earthbuild-out/",
        "build.earth",
        "Earthfile",
        EARTH_IGNORE_FILE,
        EARTHBUILD_IGNORE_FILE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Read the exclusion list for a context directory.
///
/// The first existing of `.earthignore` / `.earthbuildignore` is used; both
/// present is an error. With `use_docker_ignore`, `.dockerignore` is the
/// fallback when neither exists. Implicit excludes are appended unless
/// `no_implicit_ignore`.
pub fn read_excludes(
    dir: &Path,
    no_implicit_ignore: bool,
    use_docker_ignore: bool,
) -> Result<Vec<String>, ExcludesError> {
    let earth_exists = dir.join(EARTH_IGNORE_FILE).exists();
    let earthbuild_exists = dir.join(EARTHBUILD_IGNORE_FILE).exists();
    let docker_exists = use_docker_ignore && dir.join(DOCKER_IGNORE_FILE).exists();

    let default_excludes = if no_implicit_ignore {
        Vec::new()
    } else {
        implicit_excludes()
    };

    if earth_exists && earthbuild_exists {
        return Err(ExcludesError::DuplicateIgnoreFile);
    }

    let ignore_file = if earth_exists {
        EARTH_IGNORE_FILE
    } else if earthbuild_exists {
        EARTHBUILD_IGNORE_FILE
    } else if docker_exists {
        DOCKER_IGNORE_FILE
    } else {
        return Ok(default_excludes);
    };

    let path = dir.join(ignore_file);
    let contents = std::fs::read_to_string(&path).map_err(|e| ExcludesError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut excludes = parse_ignore_lines(&contents);
    excludes.extend(default_excludes);
    Ok(excludes)
}

/// Parse ignore-file lines: comments and blanks are dropped, patterns are
/// cleaned of trailing separators.
fn parse_ignore_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let (negate, pattern) = match line.strip_prefix('!') {
                Some(rest) => ("!", rest.trim()),
                None => ("", line),
            };
            let cleaned = pattern.trim_end_matches('/');
            format!("{negate}{cleaned}")
        })
        .collect()
}
