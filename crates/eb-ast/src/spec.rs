// SPDX-License-Identifier: MIT OR Apache-2.0
//! AST types for a parsed build file.

use serde::{Deserialize, Serialize};

/// The AST representation of a build file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Earthfile {
    /// The `VERSION` declaration, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Location of the file itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// Target declarations, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
    /// Function declarations, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<Function>,
    /// Statements before the first target declaration.
    pub base_recipe: Block,
}

impl Earthfile {
    /// Find a target by name.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Find a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A target declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Location of the declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The target name.
    pub name: String,
    /// Doc comment lines immediately preceding the declaration.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docs: String,
    /// The target's recipe.
    pub recipe: Block,
}

/// A function declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Location of the declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The function name (conventionally `UPPER_SNAKE`).
    pub name: String,
    /// The function's recipe.
    pub recipe: Block,
}

/// A `VERSION` declaration: the raw argument tokens after the keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Location of the declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// Raw arguments, e.g. `["--shell-out-anywhere", "0.7"]`.
    pub args: Vec<String>,
}

/// An ordered sequence of statements.
pub type Block = Vec<Statement>;

/// One statement of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    /// A plain command.
    Command(Command),
    /// `WITH <command> … END`.
    With(WithStatement),
    /// `IF … [ELSE IF …] [ELSE …] END`.
    If(IfStatement),
    /// `TRY … [CATCH …] [FINALLY …] END`.
    Try(TryStatement),
    /// `FOR <var> IN … END`.
    For(ForStatement),
    /// `WAIT … END`.
    Wait(WaitStatement),
}

impl Statement {
    /// The statement's source location.
    #[must_use]
    pub fn source_location(&self) -> Option<&SourceLocation> {
        match self {
            Statement::Command(c) => c.source_location.as_ref(),
            Statement::With(s) => s.source_location.as_ref(),
            Statement::If(s) => s.source_location.as_ref(),
            Statement::Try(s) => s.source_location.as_ref(),
            Statement::For(s) => s.source_location.as_ref(),
            Statement::Wait(s) => s.source_location.as_ref(),
        }
    }
}

/// A command: a name and raw argument tokens. Not interpreted at parse time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// The command keyword, e.g. `RUN` or `SAVE IMAGE`.
    pub name: String,
    /// Doc comment lines immediately preceding the command.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docs: String,
    /// Location of the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// Raw argument tokens.
    pub args: Vec<String>,
    /// True when the args came from an exec-form (`["…", "…"]`) list.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exec_mode: bool,
}

/// `WITH <command> … END`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithStatement {
    /// Location of the `WITH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The body between `WITH` and `END`.
    pub body: Block,
    /// The command following the `WITH` keyword (e.g. `DOCKER …`).
    pub command: Command,
}

/// `IF … END` with optional `ELSE IF` and `ELSE` arms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfStatement {
    /// The `ELSE` body, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_body: Option<Block>,
    /// Location of the `IF`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The condition tokens (flags plus a shell expression).
    pub expression: Vec<String>,
    /// `ELSE IF` arms, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub else_if: Vec<ElseIf>,
    /// The `IF` body.
    pub if_body: Block,
    /// True when the condition came from an exec-form list.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exec_mode: bool,
}

/// One `ELSE IF` arm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElseIf {
    /// Location of the `ELSE IF`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The condition tokens.
    pub expression: Vec<String>,
    /// The arm body.
    pub body: Block,
    /// True when the condition came from an exec-form list.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exec_mode: bool,
}

/// `TRY … [CATCH …] [FINALLY …] END`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryStatement {
    /// The `CATCH` body, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_body: Option<Block>,
    /// The `FINALLY` body, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finally_body: Option<Block>,
    /// Location of the `TRY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The `TRY` body.
    pub try_body: Block,
}

/// `FOR <var> IN <expr> … END`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForStatement {
    /// Location of the `FOR`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The raw tokens after `FOR` (`<var> IN <expr>…`, plus flags).
    pub args: Vec<String>,
    /// The loop body.
    pub body: Block,
}

/// `WAIT … END`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStatement {
    /// Location of the `WAIT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// The raw tokens after `WAIT` (reserved for future flags).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// The block body.
    pub body: Block,
}

/// A reference to a range of source text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// The file path, as given to the parser.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    /// 1-based start line.
    pub start_line: usize,
    /// 0-based start column.
    pub start_column: usize,
    /// 1-based end line.
    pub end_line: usize,
    /// 0-based end column.
    pub end_column: usize,
}

impl SourceLocation {
    /// A location spanning a single line.
    #[must_use]
    pub fn line(file: &str, line: usize) -> Self {
        Self {
            file: file.to_string(),
            start_line: line,
            start_column: 0,
            end_line: line,
            end_column: 0,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} line {}:{}", self.file, self.start_line, self.start_column)
    }
}
