// SPDX-License-Identifier: MIT OR Apache-2.0
//! Black-box tests of the `earthbuild` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn earthbuild(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("earthbuild").expect("binary");
    cmd.current_dir(dir.path());
    cmd.env("EARTHBUILD_INSTALLATION_DIR", dir.path().join(".install"));
    cmd
}

fn write_earthfile(dir: &TempDir, contents: &str) {
    std::fs::write(dir.path().join("Earthfile"), contents).expect("write Earthfile");
}

#[test]
fn ls_lists_targets() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(
        &dir,
        "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n\ntest:\n    FROM alpine:3.18\n",
    );

    earthbuild(&dir)
        .arg("ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("+build").and(predicate::str::contains("+test")));
}

#[test]
fn ls_long_shows_args() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(
        &dir,
        "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    ARG tag=latest\n",
    );

    earthbuild(&dir)
        .args(["ls", ".", "--long"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--tag"));
}

#[test]
fn ls_without_a_build_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    earthbuild(&dir)
        .arg("ls")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no build file"));
}

#[test]
fn builds_a_target_offline() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(
        &dir,
        "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    RUN echo hi\n    SAVE IMAGE app:dev\n",
    );

    earthbuild(&dir)
        .arg("+build")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Image output as app:dev")
                .and(predicate::str::contains("Build of +build complete.")),
        );
}

#[test]
fn build_verb_is_explicit_too() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(&dir, "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n");

    earthbuild(&dir)
        .args(["build", "+build"])
        .assert()
        .success();
}

#[test]
fn missing_target_is_a_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(&dir, "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n");

    earthbuild(&dir)
        .arg("+ghost")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn flag_typos_get_suggestions() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(
        &dir,
        "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    COPY --if-exist a b\n",
    );

    earthbuild(&dir)
        .arg("+build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Did you mean '--if-exists'?"));
}

#[test]
fn build_args_flow_into_the_recipe() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(
        &dir,
        "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    ARG tag=dev\n    SAVE IMAGE app:$tag\n",
    );

    earthbuild(&dir)
        .args(["+build", "--build-arg", "tag=v9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Image output as app:v9"));
}

#[test]
fn bootstrap_creates_the_installation_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    earthbuild(&dir)
        .arg("bootstrap")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bootstrapped"));
    assert!(dir.path().join(".install/config.toml").exists());
}

#[test]
fn auto_skip_short_circuits_repeat_builds() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(
        &dir,
        "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    RUN echo hi\n",
    );

    earthbuild(&dir)
        .args(["+build", "--auto-skip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Build of +build complete."));

    earthbuild(&dir)
        .args(["+build", "--auto-skip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unchanged; skipping"));
}

#[test]
fn no_target_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    earthbuild(&dir)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no target reference"));
}

#[test]
fn comp_line_produces_completions() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_earthfile(&dir, "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n");

    earthbuild(&dir)
        .env("COMP_LINE", "earthbuild +bu")
        .assert()
        .success()
        .stdout(predicate::str::contains("+build"));
}
