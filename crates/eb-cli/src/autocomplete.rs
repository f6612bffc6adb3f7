// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shell completion over `COMP_LINE`.

use std::path::Path;

const VERBS: &[&str] = &["build", "ls", "bootstrap"];
const FLAGS: &[&str] = &[
    "--push",
    "--ci",
    "--no-cache",
    "--no-output",
    "--output",
    "--artifact",
    "--image",
    "--allow-privileged",
    "--strict",
    "--remote-cache",
    "--max-remote-cache",
    "--save-inline-cache",
    "--use-inline-cache",
    "--auto-skip",
    "--no-auto-skip",
    "--platform",
    "--build-arg",
    "--secret",
    "--secret-file",
];

/// Completion suggestions for a partial command line.
#[must_use]
pub fn suggestions(comp_line: &str) -> Vec<String> {
    let ends_with_space = comp_line.ends_with(' ');
    let words: Vec<&str> = comp_line.split_whitespace().collect();
    let current = if ends_with_space {
        ""
    } else {
        words.last().copied().unwrap_or("")
    };

    if current.starts_with('+') {
        return target_suggestions(Path::new("."), current);
    }
    if let Some(dir) = current.strip_suffix('+').and_then(|d| d.strip_suffix('/')) {
        return target_suggestions(Path::new(dir), "+");
    }
    if current.starts_with("--") {
        return matching(FLAGS, current);
    }

    let mut out = matching(VERBS, current);
    out.extend(target_suggestions(Path::new("."), current));
    out
}

fn matching(candidates: &[&str], prefix: &str) -> Vec<String> {
    candidates
        .iter()
        .filter(|c| c.starts_with(prefix))
        .map(|c| c.to_string())
        .collect()
}

fn target_suggestions(dir: &Path, prefix: &str) -> Vec<String> {
    let Some(name) = prefix.strip_prefix('+') else {
        return Vec::new();
    };
    let build_file = dir.join("Earthfile");
    let Ok(earthfile) = eb_ast::parse_file(&build_file) else {
        return Vec::new();
    };
    earthfile
        .targets
        .iter()
        .filter(|t| t.name.starts_with(name))
        .map(|t| format!("+{}", t.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_verbs_and_flags() {
        assert!(suggestions("earthbuild b").contains(&"build".to_string()));
        assert!(suggestions("earthbuild --pu").contains(&"--push".to_string()));
        assert!(!suggestions("earthbuild --pu").contains(&"--platform".to_string()));
    }

    #[test]
    fn completes_targets_from_the_local_build_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("Earthfile"),
            "VERSION 0.7\n\nbuild:\n    FROM alpine\n\nbuild-docs:\n    FROM alpine\n\ntest:\n    FROM alpine\n",
        )
        .expect("write");

        let suggestions = target_suggestions(dir.path(), "+build");
        assert_eq!(suggestions, vec!["+build", "+build-docs"]);
    }
}
