//! An embeddable GNU-Make-compatible build graph and execution engine.
//!
//! [`Engine`] is the top-level entry point: it parses a makefile, resolves
//! a rule table, lazily discovers the subgraph reachable from a set of
//! goals, and runs it through [`Runner`]. Everything that touches the
//! outside world — the filesystem, a shell, include-file loading, a
//! jobserver, progress reporting — is injected through the traits in
//! [`world`], so the engine itself never assumes a particular host.

pub mod cache;
pub mod discover;
pub mod engine;
pub mod error;
pub mod expand;
pub mod functions;
pub mod graph;
pub mod parser;
pub mod progress;
pub mod resolver;
pub mod rule;
pub mod runner;
pub mod ruletable;
pub mod store;
pub mod value;
pub mod world;

pub use engine::{Engine, EngineOptions, EngineWorld, RunReport};
pub use error::{RemakeError, Result};
pub use graph::{BuildGraph, BuildId, BuildNode, FileId, GraphBuilder, RecipeLine};
pub use progress::{NOOP_PROGRESS, NoopProgress, Progress, ProgressConfig, ProgressStatus};
pub use runner::{Mode, Runner, RunnerOptions, Shuffle};
pub use world::{FileSystem, IncludeLoader, JobServer, LocalFileSystem, LocalShell, PathResolver, Shell, VpathTable};
