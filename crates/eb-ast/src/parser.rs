// SPDX-License-Identifier: MIT OR Apache-2.0
//! A line-oriented parser for build files.
//!
//! The grammar is line-based: `NAME:` declarations at column zero introduce
//! targets (or functions, when `UPPER_SNAKE`), indented lines form recipes,
//! and `IF`/`FOR`/`TRY`/`WAIT`/`WITH` open blocks closed by `END`. Comments
//! start at `#` outside quotes; a trailing `\` continues the line.

use crate::spec::{
    Block, Command, Earthfile, ElseIf, ForStatement, Function, IfStatement, SourceLocation,
    Statement, Target, TryStatement, Version, WaitStatement, WithStatement,
};
use eb_error::HintError;
use std::path::Path;

/// Hint shown when a statement does not complete on its line.
const HINT_INCOMPLETE: &str = "I couldn't find a pattern that completes the current statement - \
     check your quote pairs, paren pairs, and newlines";
/// Hint shown when a key/value command is missing its `=`.
const HINT_MISSING_EQUALS: &str =
    "I got lost looking for '=' - did you define a key/value pair without a value?";

/// A parse failure, with source location and optional hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// What went wrong.
    pub message: String,
    /// Where it went wrong.
    pub location: SourceLocation,
    /// Hints displayed after the error.
    pub hints: Vec<String>,
}

impl ParseError {
    fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
            hints: Vec::new(),
        }
    }

    fn with_hints(mut self, hints: &[&str]) -> Self {
        self.hints = hints.iter().map(|h| h.to_string()).collect();
        self
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let base = format!("{}: {}", self.location, self.message);
        match self.hints.split_first() {
            None => f.write_str(&base),
            Some((first, rest)) => {
                let mut hint = HintError::wrap(base, first.clone());
                for h in rest {
                    hint = hint.with_hint(h.clone());
                }
                write!(f, "{hint}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a build file from disk.
pub fn parse_file(path: &Path) -> Result<Earthfile, ParseError> {
    let name = path.to_string_lossy().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| {
        ParseError::new(
            format!("cannot read {name}: {e}"),
            SourceLocation::line(&name, 0),
        )
    })?;
    parse_str(&name, &text)
}

/// Parse a build file from a string. `file` is used in source locations.
pub fn parse_str(file: &str, text: &str) -> Result<Earthfile, ParseError> {
    let lines = preprocess(file, text)?;
    let mut p = Parser {
        file,
        lines,
        idx: 0,
    };
    p.parse_earthfile()
}

/// One logical line: comments stripped, continuations joined, tokenized.
#[derive(Debug)]
struct Logical {
    line_no: usize,
    indent: usize,
    tokens: Vec<String>,
    docs: String,
}

impl Logical {
    fn location(&self, file: &str) -> SourceLocation {
        let mut loc = SourceLocation::line(file, self.line_no);
        loc.start_column = self.indent;
        loc.end_column = self.indent;
        loc
    }
}

fn preprocess(file: &str, text: &str) -> Result<Vec<Logical>, ParseError> {
    let mut logical = Vec::new();
    let mut docs = String::new();
    let mut pending: Option<(usize, usize, String)> = None; // (line_no, indent, text)

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let stripped = strip_comment(raw);

        if let Some((start, indent, mut acc)) = pending.take() {
            let cont = stripped.trim();
            if let Some(head) = cont.strip_suffix('\\') {
                acc.push(' ');
                acc.push_str(head.trim_end());
                pending = Some((start, indent, acc));
                continue;
            }
            acc.push(' ');
            acc.push_str(cont);
            push_logical(file, &mut logical, start, indent, &acc, &mut docs)?;
            continue;
        }

        let trimmed = stripped.trim();
        if trimmed.is_empty() {
            // A comment-only line contributes docs; a blank line resets them.
            let comment = raw.trim();
            if let Some(text) = comment.strip_prefix('#') {
                docs.push_str(text.trim());
                docs.push('\n');
            } else {
                docs.clear();
            }
            continue;
        }

        let indent = raw.len() - raw.trim_start().len();
        if let Some(head) = trimmed.strip_suffix('\\') {
            pending = Some((line_no, indent, head.trim_end().to_string()));
            continue;
        }
        push_logical(file, &mut logical, line_no, indent, trimmed, &mut docs)?;
    }

    if let Some((start, indent, acc)) = pending {
        push_logical(file, &mut logical, start, indent, &acc, &mut docs)?;
    }

    Ok(logical)
}

fn push_logical(
    file: &str,
    logical: &mut Vec<Logical>,
    line_no: usize,
    indent: usize,
    text: &str,
    docs: &mut String,
) -> Result<(), ParseError> {
    let tokens = tokenize(text).map_err(|msg| {
        ParseError::new(msg, SourceLocation::line(file, line_no))
            .with_hints(&[HINT_INCOMPLETE])
    })?;
    logical.push(Logical {
        line_no,
        indent,
        tokens,
        docs: std::mem::take(docs),
    });
    Ok(())
}

/// Strip a `#` comment, honoring single and double quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match quote {
            None => match c {
                '#' => return &line[..i],
                '"' | '\'' => quote = Some(c),
                _ => {}
            },
            Some(q) if c == q => quote = None,
            _ => {}
        }
    }
    line
}

/// Split a line into whitespace-separated tokens, honoring quotes. Quote
/// characters are preserved in the tokens.
fn tokenize(text: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            None => {
                if c.is_whitespace() {
                    if !token.is_empty() {
                        tokens.push(std::mem::take(&mut token));
                    }
                    continue;
                }
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
                token.push(c);
            }
            Some(q) => {
                if c == q {
                    quote = None;
                }
                token.push(c);
            }
        }
    }
    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if !token.is_empty() {
        tokens.push(token);
    }
    Ok(tokens)
}

const BLOCK_KEYWORDS: &[&str] = &["END", "ELSE", "CATCH", "FINALLY"];

struct Parser<'a> {
    file: &'a str,
    lines: Vec<Logical>,
    idx: usize,
}

enum Terminator {
    End,
    Else,
    ElseIf(Vec<String>, SourceLocation),
    Catch,
    Finally,
}

impl Parser<'_> {
    fn parse_earthfile(&mut self) -> Result<Earthfile, ParseError> {
        let mut ef = Earthfile {
            source_location: Some(SourceLocation::line(self.file, 1)),
            ..Earthfile::default()
        };

        while self.idx < self.lines.len() {
            let line = &self.lines[self.idx];
            if let Some(name) = decl_name(line) {
                let name = name.to_string();
                let docs = line.docs.clone();
                let location = line.location(self.file);
                self.idx += 1;
                let recipe = self.parse_recipe()?;
                if is_function_name(&name) {
                    ef.functions.push(Function {
                        source_location: Some(location),
                        name,
                        recipe,
                    });
                } else {
                    ef.targets.push(Target {
                        source_location: Some(location),
                        name,
                        docs,
                        recipe,
                    });
                }
                continue;
            }

            if line.tokens.first().map(String::as_str) == Some("VERSION")
                && ef.version.is_none()
                && ef.base_recipe.is_empty()
                && ef.targets.is_empty()
            {
                ef.version = Some(Version {
                    source_location: Some(line.location(self.file)),
                    args: line.tokens[1..].to_vec(),
                });
                self.idx += 1;
                continue;
            }

            let stmt = self.parse_statement()?;
            ef.base_recipe.push(stmt);
        }

        Ok(ef)
    }

    /// Parse indented lines following a target/function declaration.
    fn parse_recipe(&mut self) -> Result<Block, ParseError> {
        let mut block = Block::new();
        while self.idx < self.lines.len() {
            let line = &self.lines[self.idx];
            if line.indent == 0 {
                break;
            }
            block.push(self.parse_statement()?);
        }
        Ok(block)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let line = &self.lines[self.idx];
        let location = line.location(self.file);
        let tokens = line.tokens.clone();
        let docs = line.docs.clone();

        let Some(first) = tokens.first().map(String::as_str) else {
            self.idx += 1;
            return Err(ParseError::new("empty statement", location));
        };

        match first {
            "IF" => self.parse_if(location),
            "FOR" => self.parse_for(location),
            "TRY" => self.parse_try(location),
            "WAIT" => self.parse_wait(location),
            "WITH" => self.parse_with(location),
            "END" | "ELSE" | "CATCH" | "FINALLY" => Err(ParseError::new(
                format!("unexpected keyword {first}"),
                location,
            )),
            _ => {
                self.idx += 1;
                let command = self.make_command(&tokens, docs, location)?;
                Ok(Statement::Command(command))
            }
        }
    }

    fn make_command(
        &self,
        tokens: &[String],
        docs: String,
        location: SourceLocation,
    ) -> Result<Command, ParseError> {
        let (name, mut args) = split_command_name(tokens);
        let mut exec_mode = false;

        if args.first().is_some_and(|a| a.starts_with('['))
            && matches!(name.as_str(), "RUN" | "CMD" | "ENTRYPOINT" | "SHELL" | "VOLUME")
        {
            if let Some(list) = parse_exec_form(&args) {
                args = list;
                exec_mode = true;
            }
        }

        if matches!(name.as_str(), "ARG" | "ENV" | "LET" | "SET") {
            args = split_first_key_value(&args);
        } else if name == "LABEL" {
            args = split_all_key_values(&args).map_err(|token| {
                ParseError::new(format!("invalid LABEL argument {token:?}"), location.clone())
                    .with_hints(&[HINT_MISSING_EQUALS])
            })?;
        }

        Ok(Command {
            name,
            docs,
            source_location: Some(location),
            args,
            exec_mode,
        })
    }

    fn check_block_keywords(
        &self,
        expression: &[String],
        location: &SourceLocation,
    ) -> Result<(), ParseError> {
        for token in expression {
            if BLOCK_KEYWORDS.contains(&token.as_str()) {
                let keyword_hint = format!(
                    "I parsed '{token}' as a word, but it looks like it should be a keyword - is \
                     it on the wrong line?"
                );
                return Err(
                    ParseError::new("syntax error".to_string(), location.clone())
                        .with_hints(&[HINT_INCOMPLETE, keyword_hint.as_str()]),
                );
            }
        }
        Ok(())
    }

    fn parse_if(&mut self, location: SourceLocation) -> Result<Statement, ParseError> {
        let expression = self.lines[self.idx].tokens[1..].to_vec();
        self.check_block_keywords(&expression, &location)?;
        self.idx += 1;

        let (if_body, mut term) = self.parse_block(&location, &["END", "ELSE"])?;
        let mut else_if = Vec::new();
        let mut else_body = None;

        loop {
            match term {
                Terminator::End => break,
                Terminator::ElseIf(expr, loc) => {
                    self.check_block_keywords(&expr, &loc)?;
                    let (body, next) = self.parse_block(&location, &["END", "ELSE"])?;
                    else_if.push(ElseIf {
                        source_location: Some(loc),
                        expression: expr,
                        body,
                        exec_mode: false,
                    });
                    term = next;
                }
                Terminator::Else => {
                    let (body, next) = self.parse_block(&location, &["END"])?;
                    else_body = Some(body);
                    term = next;
                }
                _ => {
                    return Err(ParseError::new("unexpected keyword in IF", location));
                }
            }
        }

        Ok(Statement::If(IfStatement {
            else_body,
            source_location: Some(location),
            expression,
            else_if,
            if_body,
            exec_mode: false,
        }))
    }

    fn parse_for(&mut self, location: SourceLocation) -> Result<Statement, ParseError> {
        let args = self.lines[self.idx].tokens[1..].to_vec();
        self.check_block_keywords(&args, &location)?;
        self.idx += 1;
        let (body, term) = self.parse_block(&location, &["END"])?;
        let Terminator::End = term else {
            return Err(ParseError::new("FOR must be closed by END", location));
        };
        Ok(Statement::For(ForStatement {
            source_location: Some(location),
            args,
            body,
        }))
    }

    fn parse_wait(&mut self, location: SourceLocation) -> Result<Statement, ParseError> {
        let args = self.lines[self.idx].tokens[1..].to_vec();
        self.check_block_keywords(&args, &location)?;
        self.idx += 1;
        let (body, term) = self.parse_block(&location, &["END"])?;
        let Terminator::End = term else {
            return Err(ParseError::new("WAIT must be closed by END", location));
        };
        Ok(Statement::Wait(WaitStatement {
            source_location: Some(location),
            args,
            body,
        }))
    }

    fn parse_try(&mut self, location: SourceLocation) -> Result<Statement, ParseError> {
        self.idx += 1;
        let (try_body, mut term) = self.parse_block(&location, &["END", "CATCH", "FINALLY"])?;
        let mut catch_body = None;
        let mut finally_body = None;

        loop {
            match term {
                Terminator::End => break,
                Terminator::Catch => {
                    let (body, next) = self.parse_block(&location, &["END", "FINALLY"])?;
                    catch_body = Some(body);
                    term = next;
                }
                Terminator::Finally => {
                    let (body, next) = self.parse_block(&location, &["END"])?;
                    finally_body = Some(body);
                    term = next;
                }
                _ => return Err(ParseError::new("unexpected keyword in TRY", location)),
            }
        }

        Ok(Statement::Try(TryStatement {
            catch_body,
            finally_body,
            source_location: Some(location),
            try_body,
        }))
    }

    fn parse_with(&mut self, location: SourceLocation) -> Result<Statement, ParseError> {
        let tokens = self.lines[self.idx].tokens[1..].to_vec();
        if tokens.is_empty() {
            return Err(ParseError::new("WITH requires a command", location));
        }
        self.idx += 1;
        let command = self.make_command(&tokens, String::new(), location.clone())?;
        let (body, term) = self.parse_block(&location, &["END"])?;
        let Terminator::End = term else {
            return Err(ParseError::new("WITH must be closed by END", location));
        };
        Ok(Statement::With(WithStatement {
            source_location: Some(location),
            body,
            command,
        }))
    }

    /// Parse statements until one of `terminators` appears on its own line.
    fn parse_block(
        &mut self,
        opened_at: &SourceLocation,
        terminators: &[&str],
    ) -> Result<(Block, Terminator), ParseError> {
        let mut block = Block::new();
        while self.idx < self.lines.len() {
            let line = &self.lines[self.idx];
            let first = line.tokens.first().map(String::as_str);
            match first {
                Some("END") if terminators.contains(&"END") => {
                    self.idx += 1;
                    return Ok((block, Terminator::End));
                }
                Some("ELSE") if terminators.contains(&"ELSE") => {
                    let loc = line.location(self.file);
                    if line.tokens.get(1).map(String::as_str) == Some("IF") {
                        let expr = line.tokens[2..].to_vec();
                        self.idx += 1;
                        return Ok((block, Terminator::ElseIf(expr, loc)));
                    }
                    self.idx += 1;
                    return Ok((block, Terminator::Else));
                }
                Some("CATCH") if terminators.contains(&"CATCH") => {
                    self.idx += 1;
                    return Ok((block, Terminator::Catch));
                }
                Some("FINALLY") if terminators.contains(&"FINALLY") => {
                    self.idx += 1;
                    return Ok((block, Terminator::Finally));
                }
                _ => block.push(self.parse_statement()?),
            }
        }
        Err(ParseError::new(
            "block is missing its END",
            opened_at.clone(),
        ))
    }
}

/// `NAME:` at column zero declares a target or function.
fn decl_name(line: &Logical) -> Option<&str> {
    if line.indent != 0 || line.tokens.len() != 1 {
        return None;
    }
    let token = line.tokens[0].as_str();
    let name = token.strip_suffix(':')?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return None;
    }
    Some(name)
}

fn is_function_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Joins multi-word command keywords (`SAVE ARTIFACT`, `GIT CLONE`, …).
fn split_command_name(tokens: &[String]) -> (String, Vec<String>) {
    let first = tokens[0].as_str();
    let second = tokens.get(1).map(String::as_str);
    let two_words = matches!(
        (first, second),
        ("SAVE", Some("ARTIFACT"))
            | ("SAVE", Some("IMAGE"))
            | ("GIT", Some("CLONE"))
            | ("FROM", Some("DOCKERFILE"))
    );
    if two_words {
        (
            format!("{} {}", first, second.unwrap_or_default()),
            tokens[2..].to_vec(),
        )
    } else {
        (first.to_string(), tokens[1..].to_vec())
    }
}

/// Parse an exec-form list (`["a", "b c"]`) back into its elements.
fn parse_exec_form(args: &[String]) -> Option<Vec<String>> {
    let joined = args.join(" ");
    let inner = joined.strip_prefix('[')?.strip_suffix(']')?;
    let mut out = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let unquoted = part
            .strip_prefix('"')
            .and_then(|p| p.strip_suffix('"'))
            .or_else(|| part.strip_prefix('\'').and_then(|p| p.strip_suffix('\'')))?;
        out.push(unquoted.to_string());
    }
    Some(out)
}

/// For `ARG`/`ENV`/`LET`/`SET`: split the first non-flag `k=v` token into
/// `k`, `=`, `v`, or normalize the `ENV k v` space form to the same shape.
fn split_first_key_value(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + 2);
    let mut args_iter = args.iter();
    for arg in args_iter.by_ref() {
        if arg.starts_with('-') {
            out.push(arg.clone());
            continue;
        }
        match arg.split_once('=') {
            Some((k, v)) => {
                out.push(k.to_string());
                out.push("=".to_string());
                out.push(v.to_string());
            }
            None => {
                let rest: Vec<&str> = args_iter.by_ref().map(String::as_str).collect();
                out.push(arg.clone());
                if let Some((first_rest, tail)) = rest.split_first() {
                    out.push("=".to_string());
                    if *first_rest == "=" {
                        out.push(tail.join(" "));
                    } else {
                        out.push(rest.join(" "));
                    }
                }
            }
        }
        break;
    }
    out.extend(args_iter.cloned());
    out
}

/// For `LABEL`: split every `k=v` token. A bare key is an error, returned
/// as the offending token.
fn split_all_key_values(args: &[String]) -> Result<Vec<String>, String> {
    let mut out = Vec::with_capacity(args.len() * 3);
    for arg in args {
        match arg.split_once('=') {
            Some((k, v)) => {
                out.push(k.to_string());
                out.push("=".to_string());
                out.push(v.to_string());
            }
            None => return Err(arg.clone()),
        }
    }
    Ok(out)
}
