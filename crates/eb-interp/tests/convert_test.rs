// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end conversion tests against the mock engine.

use eb_context::ContextResolver;
use eb_domain::Target;
use eb_interp::{BuildSession, build_target};
use eb_llb::mock::MockEngine;
use eb_llb::{ImageConfig, Op};
use eb_states::TargetOutputs;
use eb_vars::Scope;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    engine: Arc<MockEngine>,
    session: Arc<BuildSession>,
}

fn fixture(earthfile: &str) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("Earthfile"), earthfile).expect("write Earthfile");

    let engine = Arc::new(MockEngine::new());
    engine.stub_image("alpine:3.18", ImageConfig::default());

    let resolver = Arc::new(ContextResolver::new(
        dir.path().to_path_buf(),
        dir.path().join(".clones"),
    ));
    let session = Arc::new(BuildSession::new(
        Arc::clone(&engine) as Arc<dyn eb_llb::BuildEngine>,
        resolver,
    ));
    Fixture {
        _dir: dir,
        engine,
        session,
    }
}

async fn build(fx: &Fixture, target: &str) -> Result<Arc<TargetOutputs>, eb_interp::InterpreterError> {
    build_target(
        &fx.session,
        &Target::parse(target).expect("target"),
        None,
        Scope::new(),
        false,
        &[],
    )
    .await
}

fn run_commands(outputs: &TargetOutputs) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![outputs.final_state.clone()];
    let mut seen = std::collections::HashSet::new();
    while let Some(state) = stack.pop() {
        if !seen.insert(state.digest()) {
            continue;
        }
        if let Some(Op::Run(run)) = state.op() {
            out.push(run.command.join(" "));
        }
        for input in state.inputs() {
            stack.push(input.clone());
        }
    }
    out
}

#[tokio::test]
async fn converts_a_basic_recipe() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   WORKDIR /app\n\
         \x20   RUN echo hello\n\
         \x20   SAVE IMAGE app:dev\n",
    );
    let outputs = build(&fx, "+build").await.expect("build");

    assert!(
        run_commands(&outputs)
            .iter()
            .any(|c| c.contains("echo hello"))
    );
    assert_eq!(outputs.save_images.len(), 1);
    assert_eq!(outputs.save_images[0].names, vec!["app:dev"]);
    assert!(!outputs.save_images[0].push);
    assert_eq!(outputs.image_config.working_dir, "/app");
}

#[tokio::test]
async fn base_recipe_feeds_targets() {
    let fx = fixture(
        "VERSION 0.7\n\
         FROM alpine:3.18\n\
         WORKDIR /src\n\
         \n\
         test:\n\
         \x20   RUN make test\n",
    );
    let outputs = build(&fx, "+test").await.expect("build");
    assert_eq!(outputs.image_config.working_dir, "/src");
    assert!(run_commands(&outputs).iter().any(|c| c.contains("make test")));
}

#[tokio::test]
async fn missing_from_is_an_error() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         bad:\n\
         \x20   RUN echo nope\n",
    );
    let err = build(&fx, "+bad").await.unwrap_err();
    assert!(
        err.to_string().contains("not allowed before FROM"),
        "unexpected: {err}"
    );
}

#[tokio::test]
async fn unknown_flag_gets_a_suggestion() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   COPY --if-exist src dst\n",
    );
    let err = build(&fx, "+build").await.unwrap_err();
    assert!(
        err.to_string().contains("Did you mean '--if-exists'?"),
        "unexpected: {err}"
    );
}

#[tokio::test]
async fn args_expand_into_commands() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   ARG name=world\n\
         \x20   RUN echo hello $name\n",
    );
    let outputs = build(&fx, "+build").await.expect("build");
    assert!(
        run_commands(&outputs)
            .iter()
            .any(|c| c.contains("hello world")),
        "default value expands"
    );
}

#[tokio::test]
async fn overriding_args_change_the_visited_key() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   ARG tag=dev\n\
         \x20   SAVE IMAGE app:$tag\n",
    );

    let mut args = Scope::new();
    args.add_active("tag", "release");
    let with_args = build_target(
        &fx.session,
        &Target::parse("+build").expect("target"),
        None,
        args,
        false,
        &[],
    )
    .await
    .expect("build");
    assert_eq!(with_args.save_images[0].names, vec!["app:release"]);

    let without_args = build(&fx, "+build").await.expect("build");
    assert_eq!(without_args.save_images[0].names, vec!["app:dev"]);
    assert_eq!(fx.session.visited.len(), 2, "two distinct keys");
}

#[tokio::test]
async fn from_target_reuses_the_visited_entry() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         base-img:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN echo prepare\n\
         \n\
         a:\n\
         \x20   FROM +base-img\n\
         \x20   RUN echo a\n\
         \n\
         b:\n\
         \x20   FROM +base-img\n\
         \x20   RUN echo b\n\
         \n\
         all:\n\
         \x20   BUILD +a\n\
         \x20   BUILD +b\n",
    );
    build(&fx, "+all").await.expect("build");
    // base-img converted once despite two dependents: all, a, b, base-img.
    assert_eq!(fx.session.visited.len(), 4);
}

#[tokio::test]
async fn cyclic_targets_error() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         a:\n\
         \x20   FROM +b\n\
         \n\
         b:\n\
         \x20   FROM +a\n",
    );
    let err = build(&fx, "+a").await.unwrap_err();
    assert!(
        err.to_string().contains("cyclic target dependency"),
        "unexpected: {err}"
    );
}

#[tokio::test]
async fn if_takes_the_matching_branch() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   IF test -f /etc/present\n\
         \x20       RUN echo yes\n\
         \x20   ELSE\n\
         \x20       RUN echo no\n\
         \x20   END\n",
    );
    fx.engine.stub_probe("test -f /etc/present", 1, "");
    let outputs = build(&fx, "+build").await.expect("build");
    let commands = run_commands(&outputs);
    assert!(commands.iter().any(|c| c.contains("echo no")));
    assert!(!commands.iter().any(|c| c.contains("echo yes")));
}

#[tokio::test]
async fn for_iterates_over_probe_output() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   FOR svc IN ls services\n\
         \x20       RUN echo building $svc\n\
         \x20   END\n",
    );
    fx.engine.stub_probe("ls services", 0, "api\nweb\n");
    let outputs = build(&fx, "+build").await.expect("build");
    let commands = run_commands(&outputs);
    assert!(commands.iter().any(|c| c.contains("building api")));
    assert!(commands.iter().any(|c| c.contains("building web")));
}

#[tokio::test]
async fn for_requires_the_feature() {
    let fx = fixture(
        "VERSION 0.5\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   FOR x IN echo a\n\
         \x20       RUN echo $x\n\
         \x20   END\n",
    );
    let err = build(&fx, "+build").await.unwrap_err();
    assert!(err.to_string().contains("for-in"), "unexpected: {err}");
}

#[tokio::test]
async fn wait_block_drives_pushes_at_end() {
    let fx = fixture(
        "VERSION 0.8\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   WAIT\n\
         \x20       SAVE IMAGE --push registry/app:v1\n\
         \x20   END\n\
         \x20   RUN echo after\n",
    );
    let session = Arc::new(
        BuildSession::new(
            Arc::clone(&fx.engine) as Arc<dyn eb_llb::BuildEngine>,
            Arc::clone(&fx.session.resolver),
        )
        .with_push(true),
    );
    build_target(
        &session,
        &Target::parse("+build").expect("target"),
        None,
        Scope::new(),
        false,
        &[],
    )
    .await
    .expect("build");
    assert_eq!(
        fx.engine.pushes(),
        vec!["registry/app:v1"],
        "push ran at END"
    );
}

#[tokio::test]
async fn run_push_is_deferred_not_stateful() {
    let fx = fixture(
        "VERSION 0.8\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN --push echo deploy\n\
         \x20   RUN echo normal\n",
    );
    let outputs = build(&fx, "+build").await.expect("build");
    assert_eq!(outputs.run_pushes.len(), 1);
    assert_eq!(outputs.run_pushes[0].command, "echo deploy");
    let commands = run_commands(&outputs);
    assert!(
        !commands.iter().any(|c| c.contains("echo deploy")),
        "push command is not part of the state"
    );
    assert!(commands.iter().any(|c| c.contains("echo normal")));
}

#[tokio::test]
async fn save_artifact_records_and_checks_unsafe_saves() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN make out/bin\n\
         \x20   SAVE ARTIFACT out/bin /bin AS LOCAL ./dist/bin\n",
    );
    let outputs = build(&fx, "+build").await.expect("build");
    assert_eq!(outputs.save_artifacts.len(), 1);
    let save = &outputs.save_artifacts[0];
    assert_eq!(save.artifact_path, "/bin");
    assert_eq!(save.local_dest.as_deref(), Some("./dist/bin"));

    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   SAVE ARTIFACT /etc/passwd AS LOCAL ../../escape\n",
    );
    let err = build(&fx, "+build").await.unwrap_err();
    assert!(err.to_string().contains("--force"), "unexpected: {err}");
}

#[tokio::test]
async fn copy_from_target_artifact() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         tool:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN make tool\n\
         \x20   SAVE ARTIFACT build/tool /tool\n\
         \n\
         app:\n\
         \x20   FROM alpine:3.18\n\
         \x20   COPY +tool/tool /usr/bin/tool\n",
    );
    let outputs = build(&fx, "+app").await.expect("build");
    let found = {
        let mut found = false;
        let mut stack = vec![outputs.final_state.clone()];
        while let Some(state) = stack.pop() {
            if let Some(Op::Copy(copy)) = state.op()
                && copy.dest == "/usr/bin/tool"
            {
                found = true;
            }
            for input in state.inputs() {
                stack.push(input.clone());
            }
        }
        found
    };
    assert!(found, "copy op from the artifact state is present");
}

#[tokio::test]
async fn copy_missing_artifact_with_if_exists_is_elided() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         tool:\n\
         \x20   FROM alpine:3.18\n\
         \n\
         app:\n\
         \x20   FROM alpine:3.18\n\
         \x20   COPY --if-exists +tool/ghost /usr/bin/ghost\n",
    );
    build(&fx, "+app").await.expect("missing artifact tolerated");

    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         tool:\n\
         \x20   FROM alpine:3.18\n\
         \n\
         app:\n\
         \x20   FROM alpine:3.18\n\
         \x20   COPY +tool/ghost /usr/bin/ghost\n",
    );
    let err = build(&fx, "+app").await.unwrap_err();
    assert!(err.to_string().contains("not found"), "unexpected: {err}");
}

#[tokio::test]
async fn let_and_set_respect_their_feature() {
    let fx = fixture(
        "VERSION 0.8\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   LET mode=debug\n\
         \x20   SET mode=release\n\
         \x20   RUN echo $mode\n",
    );
    let outputs = build(&fx, "+build").await.expect("build");
    assert!(
        run_commands(&outputs)
            .iter()
            .any(|c| c.contains("echo release"))
    );

    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   LET mode=debug\n",
    );
    let err = build(&fx, "+build").await.unwrap_err();
    assert!(
        err.to_string().contains("arg-scope-and-set"),
        "unexpected: {err}"
    );
}

#[tokio::test]
async fn functions_run_in_their_own_frame() {
    let fx = fixture(
        "VERSION 0.8\n\
         \n\
         INSTALL:\n\
         \x20   FUNCTION\n\
         \x20   ARG pkg\n\
         \x20   RUN apk add $pkg\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   DO +INSTALL --pkg=curl\n\
         \x20   DO +INSTALL --pkg=jq\n",
    );
    let outputs = build(&fx, "+build").await.expect("build");
    let commands = run_commands(&outputs);
    assert!(commands.iter().any(|c| c.contains("apk add curl")));
    assert!(commands.iter().any(|c| c.contains("apk add jq")));
}

#[tokio::test]
async fn project_is_recorded_without_side_effects() {
    let fx = fixture(
        "VERSION 0.7\n\
         PROJECT my-org/my-proj\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n",
    );
    let outputs = build(&fx, "+build").await.expect("build");
    assert_eq!(
        outputs.project,
        Some(("my-org".to_string(), "my-proj".to_string()))
    );
}

#[tokio::test]
async fn shell_out_requires_its_feature() {
    let fx = fixture(
        "VERSION 0.6\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   ARG v=$(cat version)\n\
         \x20   RUN echo $v\n",
    );
    let err = build(&fx, "+build").await.unwrap_err();
    assert!(
        err.to_string().contains("shell-out-anywhere"),
        "unexpected: {err}"
    );
}

#[tokio::test]
async fn shell_out_expands_from_probe_output() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   ARG v=$(cat version)\n\
         \x20   RUN echo version $v\n",
    );
    fx.engine.stub_probe("cat version", 0, "1.2.3\n");
    let outputs = build(&fx, "+build").await.expect("build");
    assert!(
        run_commands(&outputs)
            .iter()
            .any(|c| c.contains("version 1.2.3"))
    );
}

#[tokio::test]
async fn cancellation_stops_conversion() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n",
    );
    fx.session
        .cancel
        .cancel(eb_sync::CancelReason::Interrupt);
    let err = build(&fx, "+build").await.unwrap_err();
    assert!(err.to_string().contains("cancelled"), "unexpected: {err}");
}

#[tokio::test]
async fn concurrent_builds_of_the_same_target_converge() {
    let fx = fixture(
        "VERSION 0.7\n\
         \n\
         build:\n\
         \x20   FROM alpine:3.18\n\
         \x20   RUN echo once\n\
         \x20   SAVE IMAGE app:shared\n",
    );
    let mut handles = Vec::new();
    for _ in 0..6 {
        let session = Arc::clone(&fx.session);
        handles.push(tokio::spawn(async move {
            build_target(
                &session,
                &Target::parse("+build").expect("target"),
                None,
                Scope::new(),
                false,
                &[],
            )
            .await
        }));
    }
    let mut image_refs = Vec::new();
    for handle in handles {
        let outputs = handle.await.expect("join").expect("build");
        image_refs.push(outputs.save_images[0].names.clone());
    }
    assert!(image_refs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(fx.session.visited.len(), 1, "single conversion");
}
