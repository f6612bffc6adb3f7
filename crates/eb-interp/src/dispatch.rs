// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command tags: the dispatch table of the interpreter.

use eb_features::Features;

/// Every recipe command the interpreter knows, as a tagged variant.
///
/// Dispatch is an exhaustive `match` on this tag; an unhandled command is a
/// compile error, not a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    /// `FROM`
    From,
    /// `FROM DOCKERFILE`
    FromDockerfile,
    /// `LOCALLY`
    Locally,
    /// `COPY`
    Copy,
    /// `ADD` (docker compatibility alias of `COPY`)
    Add,
    /// `RUN`
    Run,
    /// `SAVE ARTIFACT`
    SaveArtifact,
    /// `SAVE IMAGE`
    SaveImage,
    /// `BUILD`
    Build,
    /// `ARG`
    Arg,
    /// `LET`
    Let,
    /// `SET`
    Set,
    /// `ENV`
    Env,
    /// `LABEL`
    Label,
    /// `EXPOSE`
    Expose,
    /// `CMD`
    Cmd,
    /// `ENTRYPOINT`
    Entrypoint,
    /// `WORKDIR`
    Workdir,
    /// `USER`
    User,
    /// `VOLUME`
    Volume,
    /// `HEALTHCHECK`
    Healthcheck,
    /// `SHELL`
    Shell,
    /// `CACHE`
    Cache,
    /// `GIT CLONE`
    GitClone,
    /// `DO`
    Do,
    /// `COMMAND` (function declaration marker)
    Command,
    /// `FUNCTION` (alias of `COMMAND` under `use-function-keyword`)
    Function,
    /// `RETURN` (early exit from a function body)
    Return,
    /// `IMPORT`
    Import,
    /// `PROJECT`
    Project,
    /// `HOST`
    Host,
    /// `PIPELINE`
    Pipeline,
    /// `TRIGGER`
    Trigger,
}

impl CommandTag {
    /// Resolve a command name to its tag. Feature flags gate which names
    /// exist at all (`FUNCTION` needs `use-function-keyword`).
    #[must_use]
    pub fn from_name(name: &str, ftrs: &Features) -> Option<Self> {
        let tag = match name {
            "FROM" => Self::From,
            "FROM DOCKERFILE" => Self::FromDockerfile,
            "LOCALLY" => Self::Locally,
            "COPY" => Self::Copy,
            "ADD" => Self::Add,
            "RUN" => Self::Run,
            "SAVE ARTIFACT" => Self::SaveArtifact,
            "SAVE IMAGE" => Self::SaveImage,
            "BUILD" => Self::Build,
            "ARG" => Self::Arg,
            "LET" => Self::Let,
            "SET" => Self::Set,
            "ENV" => Self::Env,
            "LABEL" => Self::Label,
            "EXPOSE" => Self::Expose,
            "CMD" => Self::Cmd,
            "ENTRYPOINT" => Self::Entrypoint,
            "WORKDIR" => Self::Workdir,
            "USER" => Self::User,
            "VOLUME" => Self::Volume,
            "HEALTHCHECK" => Self::Healthcheck,
            "SHELL" => Self::Shell,
            "CACHE" => Self::Cache,
            "GIT CLONE" => Self::GitClone,
            "DO" => Self::Do,
            "COMMAND" => Self::Command,
            "FUNCTION" if ftrs.use_function_keyword => Self::Function,
            "RETURN" => Self::Return,
            "IMPORT" => Self::Import,
            "PROJECT" => Self::Project,
            "HOST" => Self::Host,
            "PIPELINE" => Self::Pipeline,
            "TRIGGER" => Self::Trigger,
            _ => return None,
        };
        Some(tag)
    }

    /// True for commands permitted before the first `FROM` of a recipe.
    #[must_use]
    pub fn allowed_pre_from(self) -> bool {
        matches!(
            self,
            Self::From
                | Self::FromDockerfile
                | Self::Locally
                | Self::Arg
                | Self::Let
                | Self::Set
                | Self::Import
                | Self::Project
                | Self::Pipeline
                | Self::Trigger
                | Self::Build
                | Self::Do
                | Self::Command
                | Self::Function
                | Self::Return
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(version: &str) -> Features {
        let (mut f, _) = Features::get(Some(&[version.to_string()])).expect("features");
        f.process_flags().expect("process");
        f
    }

    #[test]
    fn resolves_known_names() {
        let ftrs = features("0.8");
        assert_eq!(CommandTag::from_name("RUN", &ftrs), Some(CommandTag::Run));
        assert_eq!(
            CommandTag::from_name("SAVE ARTIFACT", &ftrs),
            Some(CommandTag::SaveArtifact)
        );
        assert_eq!(
            CommandTag::from_name("GIT CLONE", &ftrs),
            Some(CommandTag::GitClone)
        );
        assert_eq!(CommandTag::from_name("NOPE", &ftrs), None);
    }

    #[test]
    fn function_keyword_is_gated() {
        assert_eq!(CommandTag::from_name("FUNCTION", &features("0.7")), None);
        assert_eq!(
            CommandTag::from_name("FUNCTION", &features("0.8")),
            Some(CommandTag::Function)
        );
        assert_eq!(
            CommandTag::from_name("COMMAND", &features("0.7")),
            Some(CommandTag::Command)
        );
    }

    #[test]
    fn pre_from_admissibility() {
        assert!(CommandTag::Arg.allowed_pre_from());
        assert!(CommandTag::From.allowed_pre_from());
        assert!(CommandTag::Locally.allowed_pre_from());
        assert!(!CommandTag::Run.allowed_pre_from());
        assert!(!CommandTag::Copy.allowed_pre_from());
        assert!(!CommandTag::SaveImage.allowed_pre_from());
    }
}
