// SPDX-License-Identifier: MIT OR Apache-2.0
//! The flag-table argument parser.
//!
//! Parsing stops consuming flags at `--` (which is dropped) and at the first
//! positional argument, so `RUN echo --push` passes `--push` through to the
//! command untouched.

use crate::quotes::process_params_and_quotes;
use crate::suggest::closest;
use crate::{ArgOpts, CommandFlags, FlagError, FlagKind, FlagSpec};

/// A modifier applied to boolean `--flag=value` assignments before parsing.
///
/// Receives the flag name and raw value. Returning `Ok(None)` treats the
/// flag as if no value had been given.
pub type ValueModifier<'a> = dyn FnMut(&str, &str) -> Result<Option<String>, FlagError> + 'a;

/// Parse `args` against `T`'s flag table. Returns the parsed flags and the
/// positional arguments in order.
pub fn parse_args<T: CommandFlags>(args: &[String]) -> Result<(T, Vec<String>), FlagError> {
    parse_args_with_modifier(args, &mut |_, v| Ok(Some(v.to_string())))
}

/// Like [`parse_args`], but first merges tokens that were split inside
/// quotes or parens.
pub fn parse_args_cleaned<T: CommandFlags>(args: &[String]) -> Result<(T, Vec<String>), FlagError> {
    let processed = process_params_and_quotes(args);
    parse_args(&processed)
}

/// Like [`parse_args`], with a [`ValueModifier`] for boolean flag values.
/// This is the hook that lets `--push=$DO_PUSH` expand before parsing.
pub fn parse_args_with_modifier<T: CommandFlags>(
    args: &[String],
    modifier: &mut ValueModifier<'_>,
) -> Result<(T, Vec<String>), FlagError> {
    let mut opts = T::default();
    let mut positional: Vec<String> = Vec::new();
    let table = T::flag_table();
    let mut flags_done = false;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        i += 1;

        if flags_done {
            positional.push(arg.clone());
            continue;
        }
        if arg == "--" {
            flags_done = true;
            continue;
        }

        if let Some(rest) = arg.strip_prefix("--") {
            let (name, inline) = match rest.split_once('=') {
                Some((n, v)) => (n, Some(v)),
                None => (rest, None),
            };
            let spec = find_long(table, name).ok_or_else(|| unknown::<T>(table, arg, name))?;
            i = apply_flag::<T>(&mut opts, spec, name, inline, args, i, modifier)?;
            continue;
        }

        if let Some(rest) = arg.strip_prefix('-') {
            if !rest.is_empty() && !rest.starts_with('-') {
                let (name, inline) = match rest.split_once('=') {
                    Some((n, v)) => (n, Some(v)),
                    None => (rest, None),
                };
                if let Some(spec) = find_short(table, name) {
                    i = apply_flag::<T>(&mut opts, spec, name, inline, args, i, modifier)?;
                    continue;
                }
                return Err(unknown::<T>(table, arg, name));
            }
        }

        positional.push(arg.clone());
        flags_done = true;
    }

    Ok((opts, positional))
}

fn apply_flag<T: CommandFlags>(
    opts: &mut T,
    spec: &FlagSpec,
    key: &str,
    inline: Option<&str>,
    args: &[String],
    mut i: usize,
    modifier: &mut ValueModifier<'_>,
) -> Result<usize, FlagError> {
    if spec.kind == FlagKind::Bool {
        match inline {
            None => opts.set_flag(key, None)?,
            Some(v) => match modifier(key, v)? {
                None => opts.set_flag(key, None)?,
                Some(v) => opts.set_flag(key, Some(&v))?,
            },
        }
        return Ok(i);
    }

    let value = match inline {
        Some(v) => v.to_string(),
        None => {
            let v = args.get(i).ok_or_else(|| FlagError::MissingValue {
                command: T::command_name().to_string(),
                flag: format!("--{key}"),
            })?;
            i += 1;
            v.clone()
        }
    };
    opts.set_flag(key, Some(&value))?;
    Ok(i)
}

fn find_long<'t>(table: &'t [FlagSpec], name: &str) -> Option<&'t FlagSpec> {
    if name.is_empty() {
        return None;
    }
    table.iter().find(|spec| spec.long == name)
}

fn find_short<'t>(table: &'t [FlagSpec], name: &str) -> Option<&'t FlagSpec> {
    let mut chars = name.chars();
    let (c, rest) = (chars.next()?, chars.as_str());
    if !rest.is_empty() {
        return None;
    }
    table.iter().find(|spec| spec.short == Some(c))
}

fn unknown<T: CommandFlags>(table: &[FlagSpec], flag: &str, name: &str) -> FlagError {
    FlagError::Unknown {
        command: T::command_name().to_string(),
        flag: flag.split('=').next().unwrap_or(flag).to_string(),
        suggestion: closest(name, table.iter().map(|spec| spec.long)).map(String::from),
    }
}

/// Parse the `ARG` command's arguments.
///
/// Returns the flags, the argument name, and the default value if one was
/// declared. The AST splits `NAME=VALUE` into three tokens (`NAME`, `=`,
/// `VALUE`), which is the shape expected here.
pub fn parse_arg_args(
    args: &[String],
    is_base_recipe: bool,
    explicit_global_feature: bool,
) -> Result<(ArgOpts, String, Option<String>), FlagError> {
    let (mut opts, positional) = parse_args_cleaned::<ArgOpts>(args)?;

    if opts.global {
        // The flag is always part of the table; reject it manually while the
        // feature is off so the user sees it as unknown.
        if !explicit_global_feature {
            return Err(FlagError::Unknown {
                command: "ARG".to_string(),
                flag: "--global".to_string(),
                suggestion: None,
            });
        }
        if !is_base_recipe {
            return Err(FlagError::GlobalArgNotInBase);
        }
    } else if !explicit_global_feature {
        // Without the feature, every base-recipe ARG is implicitly global.
        opts.global = is_base_recipe;
    }

    match positional.len() {
        3 => {
            if positional[1] != "=" {
                return Err(FlagError::InvalidSyntax);
            }
            if opts.required {
                return Err(FlagError::RequiredArgHasDefault);
            }
            Ok((opts, positional[0].clone(), Some(positional[2].clone())))
        }
        1 => Ok((opts, positional[0].clone(), None)),
        _ => Err(FlagError::InvalidSyntax),
    }
}

/// Parse a `NAME`, `=`, `VALUE` triple (or a bare `NAME`) as produced by the
/// AST for key/value commands such as `LET`, `SET`, and `ENV`.
pub fn parse_key_value(args: &[String]) -> Result<(String, Option<String>), FlagError> {
    match args.len() {
        3 => {
            if args[1] != "=" {
                return Err(FlagError::InvalidSyntax);
            }
            Ok((args[0].clone(), Some(args[2].clone())))
        }
        1 => Ok((args[0].clone(), None)),
        _ => Err(FlagError::InvalidSyntax),
    }
}
