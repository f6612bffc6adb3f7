// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flag schemas for every recipe command.
//!
//! Any new flag must be accompanied by a new `VERSION` feature flag. This
//! applies to new features which do **not** break backwards compatibility,
//! so that a build file declaring `VERSION 0.7` can be built by any binary
//! that understands 0.7.

use crate::{FlagError, FlagKind, FlagSpec, format_duration, parse_bool_value, parse_duration};
use std::time::Duration;

/// Declare a command's flag struct together with its static flag table.
///
/// Field kinds are spelled as keywords: `bool`, `str`, `list`, `duration`,
/// `int`. A field may carry a default (`= expr`) and an optional short name
/// (`, "f"` after the long name).
macro_rules! command_opts {
    (
        $(#[$meta:meta])*
        pub struct $name:ident ($cmd:literal) {
            $(
                $(#[$fattr:meta])*
                $kind:ident $field:ident $(= $default:expr)? => $long:literal $(, $short:literal)? ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $(
                $(#[$fattr])*
                pub $field: command_opts!(@ty $kind),
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $( $field: command_opts!(@default $($default)?), )*
                }
            }
        }

        impl $crate::CommandFlags for $name {
            fn command_name() -> &'static str {
                $cmd
            }

            fn flag_table() -> &'static [FlagSpec] {
                static TABLE: &[FlagSpec] = &[
                    $(
                        FlagSpec {
                            long: $long,
                            short: command_opts!(@short $($short)?),
                            kind: command_opts!(@kind $kind),
                        },
                    )*
                ];
                TABLE
            }

            fn set_flag(&mut self, key: &str, _value: Option<&str>) -> Result<(), FlagError> {
                match key {
                    $(
                        _ if command_opts!(@matches key, $long $(, $short)?) => {
                            command_opts!(@set $kind, self, $field, $cmd, $long, _value)
                        }
                    )*
                    _ => unreachable!("flag {key} resolved outside the table"),
                }
            }

            fn format_flags(&self) -> Vec<String> {
                let _defaults = Self::default();
                #[allow(unused_mut)]
                let mut out: Vec<String> = Vec::new();
                $(
                    command_opts!(
                        @fmt $kind, self, _defaults, $field, out,
                        command_opts!(@name $long $(, $short)?)
                    );
                )*
                out
            }
        }
    };

    (@ty bool) => { bool };
    (@ty str) => { String };
    (@ty list) => { Vec<String> };
    (@ty duration) => { Duration };
    (@ty int) => { i64 };

    (@kind bool) => { FlagKind::Bool };
    (@kind str) => { FlagKind::Str };
    (@kind list) => { FlagKind::StrList };
    (@kind duration) => { FlagKind::Duration };
    (@kind int) => { FlagKind::Int };

    (@default $e:expr) => { $e };
    (@default) => { Default::default() };

    (@short $s:literal) => { Some(first_char($s)) };
    (@short) => { None };

    (@matches $key:ident, $long:literal) => { $key == $long && !$key.is_empty() };
    (@matches $key:ident, $long:literal, $short:literal) => {
        ($key == $long && !$key.is_empty()) || $key == $short
    };

    (@name $long:literal) => { concat!("--", $long) };
    (@name $long:literal, $short:literal) => {
        if $long.is_empty() { concat!("-", $short) } else { concat!("--", $long) }
    };

    (@set bool, $self:ident, $field:ident, $cmd:literal, $long:literal, $value:ident) => {{
        $self.$field = match $value {
            None => true,
            Some(v) => parse_bool_value($cmd, concat!("--", $long), v)?,
        };
        Ok(())
    }};
    (@set str, $self:ident, $field:ident, $cmd:literal, $long:literal, $value:ident) => {{
        match $value {
            Some(v) => {
                $self.$field = v.to_string();
                Ok(())
            }
            None => Err(FlagError::MissingValue {
                command: $cmd.to_string(),
                flag: concat!("--", $long).to_string(),
            }),
        }
    }};
    (@set list, $self:ident, $field:ident, $cmd:literal, $long:literal, $value:ident) => {{
        match $value {
            Some(v) => {
                $self.$field.push(v.to_string());
                Ok(())
            }
            None => Err(FlagError::MissingValue {
                command: $cmd.to_string(),
                flag: concat!("--", $long).to_string(),
            }),
        }
    }};
    (@set duration, $self:ident, $field:ident, $cmd:literal, $long:literal, $value:ident) => {{
        match $value {
            Some(v) => {
                $self.$field = parse_duration(v).ok_or_else(|| FlagError::InvalidValue {
                    command: $cmd.to_string(),
                    flag: concat!("--", $long).to_string(),
                    value: v.to_string(),
                })?;
                Ok(())
            }
            None => Err(FlagError::MissingValue {
                command: $cmd.to_string(),
                flag: concat!("--", $long).to_string(),
            }),
        }
    }};
    (@set int, $self:ident, $field:ident, $cmd:literal, $long:literal, $value:ident) => {{
        match $value {
            Some(v) => {
                $self.$field = v.parse().map_err(|_| FlagError::InvalidValue {
                    command: $cmd.to_string(),
                    flag: concat!("--", $long).to_string(),
                    value: v.to_string(),
                })?;
                Ok(())
            }
            None => Err(FlagError::MissingValue {
                command: $cmd.to_string(),
                flag: concat!("--", $long).to_string(),
            }),
        }
    }};

    (@fmt bool, $self:ident, $defaults:ident, $field:ident, $out:ident, $name:expr) => {
        if $self.$field && !$defaults.$field {
            $out.push($name.to_string());
        }
    };
    (@fmt str, $self:ident, $defaults:ident, $field:ident, $out:ident, $name:expr) => {
        if $self.$field != $defaults.$field {
            $out.push(format!("{}={}", $name, $self.$field));
        }
    };
    (@fmt list, $self:ident, $defaults:ident, $field:ident, $out:ident, $name:expr) => {
        for v in &$self.$field {
            $out.push(format!("{}={}", $name, v));
        }
    };
    (@fmt duration, $self:ident, $defaults:ident, $field:ident, $out:ident, $name:expr) => {
        if $self.$field != $defaults.$field {
            $out.push(format!("{}={}", $name, format_duration($self.$field)));
        }
    };
    (@fmt int, $self:ident, $defaults:ident, $field:ident, $out:ident, $name:expr) => {
        if $self.$field != $defaults.$field {
            $out.push(format!("{}={}", $name, $self.$field));
        }
    };
}

const fn first_char(s: &str) -> char {
    let bytes = s.as_bytes();
    bytes[0] as char
}

command_opts! {
    /// Flags accepted by `IF` / `ELSE IF` condition commands.
    pub struct IfOpts ("IF") {
        /// Make available a secret.
        list secrets => "secret";
        /// Mount a file or directory.
        list mounts => "mount";
        /// Enable privileged mode.
        bool privileged => "privileged";
        /// Make available the SSH agent of the host.
        bool with_ssh => "ssh";
        /// Always run this specific item, ignoring cache.
        bool no_cache => "no-cache";
    }
}

command_opts! {
    /// Flags accepted by `FOR`.
    pub struct ForOpts ("FOR") {
        /// Separators used for tokenizing the output of the IN expression.
        str separators = "\n\t ".to_string() => "sep";
        /// Make available a secret.
        list secrets => "secret";
        /// Mount a file or directory.
        list mounts => "mount";
        /// Enable privileged mode.
        bool privileged => "privileged";
        /// Make available the SSH agent of the host.
        bool with_ssh => "ssh";
        /// Always run this specific item, ignoring cache.
        bool no_cache => "no-cache";
    }
}

command_opts! {
    /// Flags accepted by `RUN`.
    pub struct RunOpts ("RUN") {
        /// Make credentials from an OIDC provider available to the command.
        str oidc => "oidc";
        /// Network to use; only `none` is supported.
        str network => "network";
        /// Make available a secret.
        list secrets => "secret";
        /// Mount a file or directory.
        list mounts => "mount";
        /// Execute only if the build succeeds and push mode is enabled.
        bool push => "push";
        /// Enable privileged mode.
        bool privileged => "privileged";
        /// Include the entrypoint of the image when running the command.
        bool with_entrypoint => "entrypoint";
        /// Deprecated.
        bool with_docker => "with-docker";
        /// Make available the SSH agent of the host.
        bool with_ssh => "ssh";
        /// Make AWS credentials in the environment available to the command.
        bool with_aws => "aws";
        /// Always run this specific item, ignoring cache.
        bool no_cache => "no-cache";
        /// Run with an interactive session, without saving changes.
        bool interactive => "interactive";
        /// Run with an interactive session, saving changes.
        bool interactive_keep => "interactive-keep";
        /// Do not prefix output with the target name.
        bool raw_output => "raw-output";
    }
}

command_opts! {
    /// Flags accepted by `FROM`.
    pub struct FromOpts ("FROM") {
        /// The platform to use.
        str platform => "platform";
        /// A build arg override passed on to a referenced target.
        list build_args => "build-arg";
        /// Allow commands under remote targets to enable privileged mode.
        bool allow_privileged => "allow-privileged";
        /// Pass arguments to external targets.
        bool pass_args => "pass-args";
    }
}

command_opts! {
    /// Flags accepted by `FROM DOCKERFILE`.
    pub struct FromDockerfileOpts ("FROM DOCKERFILE") {
        /// The platform to use.
        str platform => "platform";
        /// The Dockerfile target to inherit from.
        str target => "target";
        /// The Dockerfile location, relative to the build context.
        str path => "", "f";
        /// A build arg override, also passed to the Dockerfile build.
        list build_args => "build-arg";
        /// Allow the command to assume privileged mode.
        bool allow_privileged => "allow-privileged";
    }
}

command_opts! {
    /// Flags accepted by `COPY`.
    pub struct CopyOpts ("COPY") {
        /// Not supported.
        str from => "from";
        /// Apply a specific group and/or owner to the copied files.
        str chown => "chown";
        /// Apply a mode to the copied files.
        str chmod => "chmod";
        /// The platform to use.
        str platform => "platform";
        /// A build arg override passed on to a referenced target.
        list build_args => "build-arg";
        /// Copy entire directories, not just their contents.
        bool is_dir_copy => "dir";
        /// Keep created-time file timestamps.
        bool keep_ts => "keep-ts";
        /// Keep owner info.
        bool keep_own => "keep-own";
        /// Do not fail if the artifact does not exist.
        bool if_exists => "if-exists";
        /// Do not follow symlinks.
        bool symlink_no_follow => "symlink-no-follow";
        /// Allow targets to assume privileged mode.
        bool allow_privileged => "allow-privileged";
        /// Pass arguments to external targets.
        bool pass_args => "pass-args";
    }
}

command_opts! {
    /// Flags accepted by `SAVE ARTIFACT`.
    pub struct SaveArtifactOpts ("SAVE ARTIFACT") {
        /// Keep created-time file timestamps.
        bool keep_ts => "keep-ts";
        /// Keep owner info.
        bool keep_own => "keep-own";
        /// Do not fail if the artifact does not exist.
        bool if_exists => "if-exists";
        /// Do not follow symlinks.
        bool symlink_no_follow => "symlink-no-follow";
        /// Force saving outside the current directory.
        bool force => "force";
    }
}

command_opts! {
    /// Flags accepted by `SAVE IMAGE`.
    pub struct SaveImageOpts ("SAVE IMAGE") {
        /// Declare an additional cache import as a Docker tag.
        list cache_from => "cache-from";
        /// Push the image, provided the build succeeds and push mode is on.
        bool push => "push";
        /// Save this target entirely as part of the remote cache.
        bool cache_hint => "cache-hint";
        /// Use an unencrypted connection for the push.
        bool insecure => "insecure";
        /// Do not include a manifest list in the creation of the image.
        bool no_manifest_list => "no-manifest-list";
        /// Disable build-information labels on the image.
        bool without_earthly_labels => "without-earthly-labels";
    }
}

command_opts! {
    /// Flags accepted by `BUILD`.
    pub struct BuildOpts ("BUILD") {
        /// The platform(s) to build for.
        list platforms => "platform";
        /// A build arg override passed on to the referenced target.
        list build_args => "build-arg";
        /// Allow the target to assume privileged mode.
        bool allow_privileged => "allow-privileged";
        /// Pass arguments to external targets.
        bool pass_args => "pass-args";
        /// Use auto-skip to bypass the target if nothing has changed.
        bool auto_skip => "auto-skip";
    }
}

command_opts! {
    /// Flags accepted by `GIT CLONE`.
    pub struct GitCloneOpts ("GIT CLONE") {
        /// The git ref to use when cloning.
        str branch => "branch";
        /// Keep created-time file timestamps.
        bool keep_ts => "keep-ts";
    }
}

command_opts! {
    /// Flags accepted by `HEALTHCHECK`.
    pub struct HealthCheckOpts ("HEALTHCHECK") {
        /// The interval between healthchecks.
        duration interval = Duration::from_secs(30) => "interval";
        /// The timeout before the command is considered failed.
        duration timeout = Duration::from_secs(30) => "timeout";
        /// Initialization period in which failures do not count.
        duration start_period => "start-period";
        /// Retries before a container is considered unhealthy.
        int retries = 3 => "retries";
        /// Interval between health checks during the start period.
        duration start_interval = Duration::from_secs(5) => "start-interval";
    }
}

command_opts! {
    /// Flags accepted by `WITH DOCKER`.
    pub struct WithDockerOpts ("WITH DOCKER") {
        /// The platform to use.
        str platform => "platform";
        /// Persist layer data to the specified cache.
        str cache_id => "cache-id";
        /// A compose file used to bring up services.
        list compose_files => "compose";
        /// A compose service to bring up.
        list compose_services => "service";
        /// An image produced by a target, loaded as a Docker image.
        list loads => "load";
        /// A build arg override passed on to a referenced target.
        list build_args => "build-arg";
        /// An image pulled and made available in the docker cache.
        list pulls => "pull";
        /// Allow targets referenced by load to assume privileged mode.
        bool allow_privileged => "allow-privileged";
        /// Pass arguments to external targets.
        bool pass_args => "pass-args";
    }
}

command_opts! {
    /// Flags accepted by `DO`.
    pub struct DoOpts ("DO") {
        /// Allow targets to assume privileged mode.
        bool allow_privileged => "allow-privileged";
        /// Pass arguments to external targets.
        bool pass_args => "pass-args";
    }
}

command_opts! {
    /// Flags accepted by `IMPORT`.
    pub struct ImportOpts ("IMPORT") {
        /// Allow targets to assume privileged mode.
        bool allow_privileged => "allow-privileged";
        /// Pass arguments to external targets.
        bool pass_args => "pass-args";
    }
}

command_opts! {
    /// Flags accepted by `ARG`.
    pub struct ArgOpts ("ARG") {
        /// Require the argument to be non-empty.
        bool required => "required";
        /// Make the argument available to all other targets.
        bool global => "global";
    }
}

command_opts! {
    /// Flags accepted by `PROJECT`.
    pub struct ProjectOpts ("PROJECT") {}
}

command_opts! {
    /// Flags accepted by `SET`.
    pub struct SetOpts ("SET") {}
}

command_opts! {
    /// Flags accepted by `LET`.
    pub struct LetOpts ("LET") {}
}

command_opts! {
    /// Flags accepted by `CACHE`.
    pub struct CacheOpts ("CACHE") {
        /// The cache sharing mode: locked (default), shared, private.
        str sharing => "sharing";
        /// Apply a mode to the cache folder.
        str mode = "0644".to_string() => "chmod";
        /// Cache ID, to reuse the same cache across targets and files.
        str id => "id";
        /// Persist cache state in the image.
        bool persist => "persist";
    }
}
