//! Structured error carriers for every phase of the engine.
//!
//! Each phase gets its own error enum so callers can match on the phase that
//! failed without string-sniffing; [`RemakeError`] is the umbrella type
//! `Engine::run` and `Parser::parse_*` return.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// A source location used for parse and recipe diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Location {
    pub file: Option<PathBuf>,
    pub line: usize,
}

impl Location {
    pub fn new(file: Option<PathBuf>, line: usize) -> Self {
        Self { file, line }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file.display(), self.line),
            None => write!(f, "<makefile>:{}", self.line),
        }
    }
}

/// Errors raised while scanning and recognizing makefile syntax.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("{0}: unexpected end of file while reading {1}")]
    UnexpectedEof(Location, &'static str),
    #[error("{0}: recipe line has no preceding rule")]
    RecipeWithoutRule(Location),
    #[error("{0}: extraneous `{1}`")]
    Extraneous(Location, &'static str),
    #[error("{0}: unterminated conditional (missing endif)")]
    UnterminatedConditional(Location),
    #[error("{0}: unterminated define (missing endef)")]
    UnterminatedDefine(Location),
    #[error("{0}: invalid assignment syntax: {1}")]
    InvalidAssignment(Location, String),
    #[error("{0}: invalid rule header: {1}")]
    InvalidRule(Location, String),
    #[error("{0}: unrecognized line after expansion: {1}")]
    Unrecognized(Location, String),
    #[error("{0}: invalid vpath directive")]
    InvalidVpath(Location),
    #[error("{0}: {1}")]
    Include(Location, String),
    #[error("{0}: {1}")]
    Io(Location, #[source] Arc<std::io::Error>),
}

impl ParseError {
    pub fn location(&self) -> &Location {
        match self {
            ParseError::UnexpectedEof(l, _)
            | ParseError::RecipeWithoutRule(l)
            | ParseError::Extraneous(l, _)
            | ParseError::UnterminatedConditional(l)
            | ParseError::UnterminatedDefine(l)
            | ParseError::InvalidAssignment(l, _)
            | ParseError::InvalidRule(l, _)
            | ParseError::Unrecognized(l, _)
            | ParseError::InvalidVpath(l)
            | ParseError::Include(l, _)
            | ParseError::Io(l, _) => l,
        }
    }
}

/// Errors raised while evaluating `$(...)`/`${...}` expressions.
///
/// These are normally recovered locally by the [`crate::expand::Expander`]
/// (logged and treated as empty output) so a bad function call deep inside a
/// diagnostic string does not tear down the whole build; `error()` is the one
/// function that is meant to propagate.
#[derive(Debug, Clone, Error)]
pub enum ExpandError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("{0}")]
    UserError(String),
    #[error("function `{0}` expects at least {1} argument(s), got {2}")]
    Arity(String, usize, usize),
    #[error("recursive variable reference exceeded depth limit while expanding `{0}`")]
    RecursionLimit(String),
}

/// Errors raised while resolving a target to a rule.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("no rule to make target `{0}`")]
    NoRule(String),
    #[error("no rule to make target `{0}`, needed to build intermediate for `{1}`")]
    NoImplicitChain(String, String),
}

/// Errors raised while executing the build graph.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("recipe for `{target}` failed: {detail}")]
    RecipeFailed { target: String, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("missing and no rule to make prerequisite `{0}`")]
    MissingFile(String),
    #[error("the build graph contains a cycle reachable from `{0}`")]
    Cycle(String),
}

/// Top-level error type returned by [`crate::engine::Engine`] entry points.
#[derive(Debug, Error)]
pub enum RemakeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Run(#[from] RunError),
}

pub type Result<T, E = RemakeError> = std::result::Result<T, E>;
