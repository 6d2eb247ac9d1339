//! Build graph representation.
//!
//! Shaped after the teacher's `graph.rs`: an append-only [`GraphBuilder`]
//! produces an immutable [`BuildGraph`] addressed by opaque [`BuildId`]/
//! [`FileId`] indices over a `petgraph::DiGraphMap`. Unlike the teacher,
//! nodes here are discovered lazily by [`crate::discover`] rather than
//! declared up front, and a node's "command" is a sequence of recipe lines
//! run through a shell rather than an argv or a Rust callback.

use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use petgraph::prelude::DiGraphMap;
use smol_str::SmolStr;

/// The build graph to be executed.
///
/// This type is immutable. To build it, use [`GraphBuilder`].
#[derive(Default, Debug)]
pub struct BuildGraph {
    nodes: Vec<BuildNode>,
    files: IndexSet<PathBuf>,
    pub(crate) graph: DiGraphMap<BuildId, ()>,
}

impl BuildGraph {
    pub fn nodes(&self) -> impl Iterator<Item = (BuildId, &BuildNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (BuildId(i), n))
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &PathBuf)> {
        self.files.iter().enumerate().map(|(i, p)| (FileId(i), p))
    }

    /// Build nodes this node depends on (must finish before it starts).
    pub fn build_dependencies(&self, build_id: BuildId) -> impl Iterator<Item = BuildId> + '_ {
        self.graph
            .neighbors_directed(build_id, petgraph::Direction::Outgoing)
    }

    /// Build nodes that depend on this one.
    pub fn build_dependents(&self, build_id: BuildId) -> impl Iterator<Item = BuildId> + '_ {
        self.graph
            .neighbors_directed(build_id, petgraph::Direction::Incoming)
    }

    pub fn lookup_fileid(&self, path: impl AsRef<Path>) -> Option<FileId> {
        self.files.get_index_of(path.as_ref()).map(FileId)
    }

    pub fn lookup_path(&self, file_id: FileId) -> Option<&PathBuf> {
        self.files.get_index(file_id.0)
    }

    pub fn lookup_build(&self, build_id: BuildId) -> Option<&BuildNode> {
        self.nodes.get(build_id.0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// The builder used to assemble a [`BuildGraph`] during discovery.
///
/// Append-only: nodes and files, once added, cannot be removed. Edges point
/// from a dependent node to the dependencies it needs finished first.
#[derive(Default, Debug)]
pub struct GraphBuilder {
    graph: BuildGraph,
}

/// An index that uniquely identifies an (input or output) file in the build graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

/// An index that uniquely identifies a build node in the build graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildId(usize);

impl GraphBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a file to the graph, returning its ID. Accepts an owned
    /// `PathBuf`, avoiding an unnecessary clone if the caller already owns
    /// the path.
    pub fn add_file_owned(&mut self, path: impl Into<PathBuf>) -> FileId {
        let path = path.into();
        if let Some(id) = self.graph.files.get_index_of(&path) {
            return FileId(id);
        }
        let id = self.graph.files.len();
        self.graph.files.insert(path);
        FileId(id)
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>) -> FileId {
        let path = path.as_ref();
        if let Some(id) = self.graph.files.get_index_of(path) {
            return FileId(id);
        }
        let id = self.graph.files.len();
        self.graph.files.insert(path.to_owned());
        FileId(id)
    }

    /// Adds a build node to the graph, returning its ID.
    pub fn add_build(&mut self, build: BuildNode) -> BuildId {
        let id = self.graph.nodes.len();
        let build_id = BuildId(id);
        self.graph.nodes.push(build);
        build_id
    }

    /// Adds a build dependency edge: `dependent` needs `dependency` finished
    /// before it can start.
    pub fn add_build_dep(&mut self, dependent: BuildId, dependency: BuildId) {
        self.graph.graph.add_edge(dependent, dependency, ());
    }

    pub fn lookup_fileid(&self, path: impl AsRef<Path>) -> Option<FileId> {
        self.graph.lookup_fileid(path)
    }

    pub fn lookup_path(&self, file_id: FileId) -> Option<&PathBuf> {
        self.graph.lookup_path(file_id)
    }

    pub fn lookup_build(&self, build_id: BuildId) -> Option<&BuildNode> {
        self.graph.lookup_build(build_id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Finishes building the graph. Cycles are allowed to survive here —
    /// unlike the teacher's static graph, the discovery pass walks the
    /// makefile's own dependency structure, and a cycle there is a
    /// target-level diagnostic ([`crate::error::RunError::Cycle`]) rather
    /// than an internal invariant violation, so the runner checks instead
    /// of this builder.
    pub fn build(self) -> BuildGraph {
        self.graph
    }
}

/// A single node in the build graph: either a `.WAIT`/`.NOTPARALLEL`
/// synthetic barrier with no targets, or a real rule application.
#[derive(Debug)]
pub struct BuildNode {
    /// Every target this node updates (more than one only for grouped
    /// (`&:`) rules).
    pub targets: Vec<SmolStr>,
    pub outs: Vec<FileId>,
    /// Prerequisites that participate in the rebuild timestamp comparison,
    /// in declaration order with duplicates preserved (needed for `$+`;
    /// `$^`/`$<` dedup at read time).
    pub prerequisites: Vec<String>,
    /// Prerequisites that must exist but never trigger a rebuild (`|`).
    pub order_only: Vec<String>,
    pub recipe: Vec<RecipeLine>,
    pub phony: bool,
    /// `.WAIT`/`.NOTPARALLEL` placeholder: has no recipe and is never
    /// "run", only waited on.
    pub barrier: bool,
    pub oneshell: bool,
    pub always_rebuild: bool,
}

impl BuildNode {
    pub fn barrier() -> Self {
        Self {
            targets: Vec::new(),
            outs: Vec::new(),
            prerequisites: Vec::new(),
            order_only: Vec::new(),
            recipe: Vec::new(),
            phony: true,
            barrier: true,
            oneshell: false,
            always_rebuild: false,
        }
    }

    pub fn write_human_readable(&self, mut w: impl std::io::Write) -> std::io::Result<()> {
        if self.barrier {
            return write!(w, "<barrier>");
        }
        if self.recipe.is_empty() {
            return write!(w, "<phony>");
        }
        for (i, line) in self.recipe.iter().enumerate() {
            if i > 0 {
                writeln!(w)?;
            }
            write!(w, "{}", line.text)?;
        }
        Ok(())
    }
}

/// A single recipe line after flag-stripping, before expansion.
#[derive(Debug, Clone)]
pub struct RecipeLine {
    pub text: String,
    /// `@` prefix: do not echo the command.
    pub silent: bool,
    /// `-` prefix: a non-zero exit from this line does not fail the build.
    pub ignore_error: bool,
    /// `+` prefix: run even under dry-run mode.
    pub always_run: bool,
}
