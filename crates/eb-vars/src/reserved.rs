// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reserved builtin ARG names.

/// `EARTHLY_BUILD_SHA` — git sha this binary was built from.
pub const BUILD_SHA: &str = "EARTHLY_BUILD_SHA";
/// `EARTHLY_GIT_BRANCH` — first branch pointing at HEAD.
pub const GIT_BRANCH: &str = "EARTHLY_GIT_BRANCH";
/// `EARTHLY_GIT_COMMIT_TIMESTAMP` — committer timestamp of HEAD.
pub const GIT_COMMIT_TIMESTAMP: &str = "EARTHLY_GIT_COMMIT_TIMESTAMP";
/// `EARTHLY_GIT_COMMIT_AUTHOR_TIMESTAMP` — author timestamp of HEAD.
pub const GIT_COMMIT_AUTHOR_TIMESTAMP: &str = "EARTHLY_GIT_COMMIT_AUTHOR_TIMESTAMP";
/// `EARTHLY_GIT_HASH` — commit hash of HEAD.
pub const GIT_HASH: &str = "EARTHLY_GIT_HASH";
/// `EARTHLY_GIT_ORIGIN_URL` — origin remote URL.
pub const GIT_ORIGIN_URL: &str = "EARTHLY_GIT_ORIGIN_URL";
/// `EARTHLY_GIT_ORIGIN_URL_SCRUBBED` — origin URL with credentials masked.
pub const GIT_ORIGIN_URL_SCRUBBED: &str = "EARTHLY_GIT_ORIGIN_URL_SCRUBBED";
/// `EARTHLY_GIT_PROJECT_NAME` — `org/project` from the origin URL.
pub const GIT_PROJECT_NAME: &str = "EARTHLY_GIT_PROJECT_NAME";
/// `EARTHLY_GIT_AUTHOR` — author of HEAD.
pub const GIT_AUTHOR: &str = "EARTHLY_GIT_AUTHOR";
/// `EARTHLY_GIT_AUTHOR_EMAIL` — author email of HEAD.
pub const GIT_AUTHOR_EMAIL: &str = "EARTHLY_GIT_AUTHOR_EMAIL";
/// `EARTHLY_GIT_AUTHOR_NAME` — author name of HEAD.
pub const GIT_AUTHOR_NAME: &str = "EARTHLY_GIT_AUTHOR_NAME";
/// `EARTHLY_GIT_CO_AUTHORS` — co-authors of HEAD.
pub const GIT_CO_AUTHORS: &str = "EARTHLY_GIT_CO_AUTHORS";
/// `EARTHLY_GIT_SHORT_HASH` — abbreviated commit hash of HEAD.
pub const GIT_SHORT_HASH: &str = "EARTHLY_GIT_SHORT_HASH";
/// `EARTHLY_GIT_TAG` — first tag pointing at HEAD.
pub const GIT_TAG: &str = "EARTHLY_GIT_TAG";
/// `EARTHLY_GIT_REFS` — refs pointing at HEAD.
pub const GIT_REFS: &str = "EARTHLY_GIT_REFS";
/// `EARTHLY_LOCALLY` — true in `LOCALLY` targets.
pub const LOCALLY: &str = "EARTHLY_LOCALLY";
/// `EARTHLY_PUSH` — true when push mode is enabled.
pub const PUSH: &str = "EARTHLY_PUSH";
/// `EARTHLY_CI` — true when running under `--ci`.
pub const CI: &str = "EARTHLY_CI";
/// `EARTHLY_CI_RUNNER` — true when running on a managed CI runner.
pub const CI_RUNNER: &str = "EARTHLY_CI_RUNNER";
/// `EARTHLY_SOURCE_DATE_EPOCH` — committer timestamp or `0`.
pub const SOURCE_DATE_EPOCH: &str = "EARTHLY_SOURCE_DATE_EPOCH";
/// `EARTHLY_TARGET` — canonical reference of the current target.
pub const TARGET: &str = "EARTHLY_TARGET";
/// `EARTHLY_TARGET_NAME` — name component of the current target.
pub const TARGET_NAME: &str = "EARTHLY_TARGET_NAME";
/// `EARTHLY_TARGET_PROJECT` — project component of the current target.
pub const TARGET_PROJECT: &str = "EARTHLY_TARGET_PROJECT";
/// `EARTHLY_TARGET_PROJECT_NO_TAG` — project without the git tag.
pub const TARGET_PROJECT_NO_TAG: &str = "EARTHLY_TARGET_PROJECT_NO_TAG";
/// `EARTHLY_TARGET_TAG` — git tag (or branch) feeding image tags.
pub const TARGET_TAG: &str = "EARTHLY_TARGET_TAG";
/// `EARTHLY_TARGET_TAG_DOCKER` — docker-safe form of `EARTHLY_TARGET_TAG`.
pub const TARGET_TAG_DOCKER: &str = "EARTHLY_TARGET_TAG_DOCKER";
/// `EARTHLY_VERSION` — version of this binary.
pub const VERSION: &str = "EARTHLY_VERSION";
/// `NATIVEARCH` — architecture of the build worker.
pub const NATIVE_ARCH: &str = "NATIVEARCH";
/// `NATIVEOS` — OS of the build worker.
pub const NATIVE_OS: &str = "NATIVEOS";
/// `NATIVEPLATFORM` — platform of the build worker.
pub const NATIVE_PLATFORM: &str = "NATIVEPLATFORM";
/// `NATIVEVARIANT` — architecture variant of the build worker.
pub const NATIVE_VARIANT: &str = "NATIVEVARIANT";
/// `TARGETARCH` — architecture being built for.
pub const TARGET_ARCH: &str = "TARGETARCH";
/// `TARGETOS` — OS being built for.
pub const TARGET_OS: &str = "TARGETOS";
/// `TARGETPLATFORM` — platform being built for.
pub const TARGET_PLATFORM: &str = "TARGETPLATFORM";
/// `TARGETVARIANT` — architecture variant being built for.
pub const TARGET_VARIANT: &str = "TARGETVARIANT";
/// `USERARCH` — architecture of the invoking host.
pub const USER_ARCH: &str = "USERARCH";
/// `USEROS` — OS of the invoking host.
pub const USER_OS: &str = "USEROS";
/// `USERPLATFORM` — platform of the invoking host.
pub const USER_PLATFORM: &str = "USERPLATFORM";
/// `USERVARIANT` — architecture variant of the invoking host.
pub const USER_VARIANT: &str = "USERVARIANT";

/// Every reserved builtin ARG name.
pub const ALL: &[&str] = &[
    BUILD_SHA,
    GIT_BRANCH,
    GIT_COMMIT_TIMESTAMP,
    GIT_COMMIT_AUTHOR_TIMESTAMP,
    GIT_AUTHOR,
    GIT_AUTHOR_EMAIL,
    GIT_AUTHOR_NAME,
    GIT_CO_AUTHORS,
    GIT_HASH,
    GIT_ORIGIN_URL,
    GIT_ORIGIN_URL_SCRUBBED,
    GIT_PROJECT_NAME,
    GIT_SHORT_HASH,
    GIT_TAG,
    GIT_REFS,
    LOCALLY,
    PUSH,
    CI,
    CI_RUNNER,
    SOURCE_DATE_EPOCH,
    TARGET,
    TARGET_NAME,
    TARGET_PROJECT,
    TARGET_PROJECT_NO_TAG,
    TARGET_TAG,
    TARGET_TAG_DOCKER,
    VERSION,
    NATIVE_ARCH,
    NATIVE_OS,
    NATIVE_PLATFORM,
    NATIVE_VARIANT,
    TARGET_ARCH,
    TARGET_OS,
    TARGET_PLATFORM,
    TARGET_VARIANT,
    USER_ARCH,
    USER_OS,
    USER_PLATFORM,
    USER_VARIANT,
];

/// True if `name` is a reserved builtin ARG name.
#[must_use]
pub fn is_builtin(name: &str) -> bool {
    ALL.contains(&name)
}
