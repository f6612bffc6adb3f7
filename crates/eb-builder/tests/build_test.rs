// SPDX-License-Identifier: MIT OR Apache-2.0
//! Coordinator tests against the mock engine.

use eb_builder::{BuildError, BuildOpt, Builder, OutputHandlers};
use eb_context::ContextResolver;
use eb_domain::Target;
use eb_interp::BuildSession;
use eb_llb::mock::MockEngine;
use eb_llb::{EngineError, ImageConfig};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Fixture {
    _dir: TempDir,
    engine: Arc<MockEngine>,
    builder: Builder,
}

fn fixture(earthfile: &str, push: bool) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("Earthfile"), earthfile).expect("write Earthfile");

    let engine = Arc::new(MockEngine::new());
    engine.stub_image("alpine:3.18", ImageConfig::default());

    let resolver = Arc::new(ContextResolver::new(
        dir.path().to_path_buf(),
        dir.path().join(".clones"),
    ));
    let session = Arc::new(
        BuildSession::new(
            Arc::clone(&engine) as Arc<dyn eb_llb::BuildEngine>,
            resolver,
        )
        .with_push(push),
    );
    Fixture {
        _dir: dir,
        engine,
        builder: Builder::new(session),
    }
}

#[tokio::test]
async fn builds_and_reports_images() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN echo hi\n\
         \x20   SAVE IMAGE app:dev\n",
        false,
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let handlers = OutputHandlers {
        on_image: Some(Box::new(move |name| {
            seen_clone.lock().expect("seen lock").push(name.to_string());
        })),
        ..OutputHandlers::default()
    };

    let result = fx
        .builder
        .build(
            &Target::parse("+build").expect("target"),
            BuildOpt::default(),
            &handlers,
            None,
        )
        .await
        .expect("build");

    assert_eq!(seen.lock().expect("seen lock").as_slice(), ["app:dev"]);
    assert_eq!(result.image_names.len(), 1);
    assert_eq!(fx.engine.solves().len(), 1);
    // Not in push mode: the saved image is not pushed.
    assert!(fx.engine.pushes().is_empty());
}

#[tokio::test]
async fn status_events_reach_the_subscriber() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN echo hi\n",
        false,
    );

    let (tx, mut rx) = mpsc::channel(64);
    fx.builder
        .build(
            &Target::parse("+build").expect("target"),
            BuildOpt::default(),
            &OutputHandlers::default(),
            Some(tx),
        )
        .await
        .expect("build");

    let mut events = 0;
    while rx.try_recv().is_ok() {
        events += 1;
    }
    assert!(events >= 2, "vertex events were forwarded, got {events}");
}

#[tokio::test]
async fn push_mode_pushes_after_the_solve() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   SAVE IMAGE --push registry/app:v1\n",
        true,
    );

    fx.builder
        .build(
            &Target::parse("+build").expect("target"),
            BuildOpt::default(),
            &OutputHandlers::default(),
            None,
        )
        .await
        .expect("build");
    assert_eq!(fx.engine.pushes(), vec!["registry/app:v1"]);
}

#[tokio::test]
async fn failed_builds_never_push() {
    // A failing RUN prevents the deferred push from ever executing; no
    // network effect is observable.
    let fx = fixture(
        "VERSION 0.8\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN --push echo go\n\
         \x20   RUN false\n",
        true,
    );
    fx.engine.fail_solves(EngineError::ExitCode(1));

    let err = fx
        .builder
        .build(
            &Target::parse("+build").expect("target"),
            BuildOpt::default(),
            &OutputHandlers::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Engine(EngineError::ExitCode(1))));
    assert!(fx.engine.pushes().is_empty(), "no push on failure");
}

#[tokio::test]
async fn artifacts_route_to_the_artifact_handler() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN make out\n\
         \x20   SAVE ARTIFACT out /out AS LOCAL ./dist\n",
        false,
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let handlers = OutputHandlers {
        on_artifact: Some(Box::new(move |artifact, dest| {
            seen_clone
                .lock()
                .expect("seen lock")
                .push(format!("{artifact} -> {dest}"));
        })),
        ..OutputHandlers::default()
    };

    fx.builder
        .build(
            &Target::parse("+build").expect("target"),
            BuildOpt::default(),
            &handlers,
            None,
        )
        .await
        .expect("build");

    let seen = seen.lock().expect("seen lock");
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("+build/out -> ./dist"), "got {seen:?}");
}

#[tokio::test]
async fn cache_options_are_attached_to_the_request() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n",
        false,
    );

    fx.builder
        .build(
            &Target::parse("+build").expect("target"),
            BuildOpt {
                cache_imports: vec!["reg/cache:a".to_string(), "reg/cache:b".to_string()],
                cache_export: "reg/cache:out".to_string(),
                max_cache_export: "reg/cache:max".to_string(),
                save_inline_cache: true,
                ..BuildOpt::default()
            },
            &OutputHandlers::default(),
            None,
        )
        .await
        .expect("build");

    let solves = fx.engine.solves();
    let request = &solves[0];
    assert_eq!(request.cache_imports.len(), 2);
    assert_eq!(request.cache_exports.len(), 3);
    assert_eq!(request.cache_exports[2].kind, "inline");
    assert_eq!(
        request.cache_exports[1].attrs.get("mode").map(String::as_str),
        Some("max")
    );
}

#[tokio::test]
async fn interpreter_errors_are_recovered_from_engine_text() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n",
        false,
    );
    fx.engine.fail_solves(EngineError::Unknown(
        "my/Earthfile line 4:2 something went wrong".to_string(),
    ));

    let err = fx
        .builder
        .build(
            &Target::parse("+build").expect("target"),
            BuildOpt::default(),
            &OutputHandlers::default(),
            None,
        )
        .await
        .unwrap_err();
    let BuildError::Interpreter(ie) = err else {
        panic!("expected interpreter error, got {err:?}");
    };
    assert_eq!(ie.message(), "something went wrong");
    assert_eq!(ie.location().expect("location").start_line, 4);
}
