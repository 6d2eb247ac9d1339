//! Rule and scope data types, pre- and post-expansion.

use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;

use crate::error::Location;

/// A single `target: prerequisites` header plus its accumulated recipe, as
/// parsed, before any variable expansion has run.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    /// Raw text, possibly multiple words and `%` patterns.
    pub targets: String,
    /// Raw text; may contain `|` and `.WAIT` pseudo-items.
    pub prerequisites: String,
    pub recipe: Vec<String>,
    pub double_colon: bool,
    /// `&:` grouped rule: one recipe updates every listed target together.
    pub grouped: bool,
    pub builtin: bool,
    pub location: Location,
}

impl RuleEntry {
    pub fn new(targets: impl Into<String>, prerequisites: impl Into<String>, location: Location) -> Self {
        Self {
            targets: targets.into(),
            prerequisites: prerequisites.into(),
            recipe: Vec::new(),
            double_colon: false,
            grouped: false,
            builtin: false,
            location,
        }
    }
}

/// A rule after target/prerequisite text has been expanded, ready for the
/// resolver and runner to act on.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    /// Populated for grouped rules: every target the one recipe updates.
    pub targets: Vec<SmolStr>,
    pub prerequisites: Vec<String>,
    pub order_only: Vec<String>,
    pub recipe: Vec<String>,
    pub stem: Option<String>,
    /// The original `%`-bearing target word, for pattern/anything rules
    /// the `RuleTable` hasn't matched against a concrete target yet.
    pub pattern: Option<SmolStr>,
    /// No prerequisites and the target matched via an exact rule with `%`
    /// as the literal target text (i.e. a catch-all rule).
    pub all: bool,
    /// Double-colon pattern rule: excluded from implicit-chain search.
    pub terminal: bool,
    pub double_colon: bool,
    pub location: Location,
}

impl Rule {
    pub fn has_recipe(&self) -> bool {
        !self.recipe.is_empty()
    }
}

/// Per-target or per-pattern variable overlay, installed by a rule header
/// whose right-hand side is itself an assignment.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub variables: IndexMap<SmolStr, crate::value::VariableValue>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: SmolStr, value: crate::value::VariableValue) {
        self.variables.insert(name, value);
    }
}

/// The canonical special-target names recognized by the engine (the text
/// between `.` and the rest, e.g. `PHONY` for `.PHONY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialTarget {
    Phony,
    Precious,
    Intermediate,
    NotIntermediate,
    Secondary,
    SecondExpansion,
    DeleteOnError,
    Ignore,
    LowResolutionTime,
    Silent,
    ExportAllVariables,
    NotParallel,
    OneShell,
    Posix,
}

impl SpecialTarget {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "PHONY" => Self::Phony,
            "PRECIOUS" => Self::Precious,
            "INTERMEDIATE" => Self::Intermediate,
            "NOTINTERMEDIATE" => Self::NotIntermediate,
            "SECONDARY" => Self::Secondary,
            "SECONDEXPANSION" => Self::SecondExpansion,
            "DELETE_ON_ERROR" => Self::DeleteOnError,
            "IGNORE" => Self::Ignore,
            "LOW_RESOLUTION_TIME" => Self::LowResolutionTime,
            "SILENT" => Self::Silent,
            "EXPORT_ALL_VARIABLES" => Self::ExportAllVariables,
            "NOTPARALLEL" => Self::NotParallel,
            "ONESHELL" => Self::OneShell,
            "POSIX" => Self::Posix,
            _ => return None,
        })
    }
}

/// Membership in a special-target set: either every target (the directive
/// had no prerequisites) or a specific list.
#[derive(Debug, Clone, Default)]
pub struct SpecialTargetSet {
    universal: bool,
    members: IndexSet<String>,
}

impl SpecialTargetSet {
    pub fn add(&mut self, targets: impl IntoIterator<Item = String>) {
        let mut any = false;
        for t in targets {
            any = true;
            self.members.insert(t);
        }
        if !any {
            self.universal = true;
        }
    }

    pub fn contains(&self, target: &str) -> bool {
        self.universal || self.members.contains(target)
    }

    pub fn is_universal(&self) -> bool {
        self.universal
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|s| s.as_str())
    }
}

/// All twelve special-target sets tracked by the engine, keyed by
/// [`SpecialTarget`].
#[derive(Debug, Clone, Default)]
pub struct SpecialTargets {
    sets: IndexMap<&'static str, SpecialTargetSet>,
}

impl SpecialTargets {
    fn key(kind: SpecialTarget) -> &'static str {
        match kind {
            SpecialTarget::Phony => "PHONY",
            SpecialTarget::Precious => "PRECIOUS",
            SpecialTarget::Intermediate => "INTERMEDIATE",
            SpecialTarget::NotIntermediate => "NOTINTERMEDIATE",
            SpecialTarget::Secondary => "SECONDARY",
            SpecialTarget::SecondExpansion => "SECONDEXPANSION",
            SpecialTarget::DeleteOnError => "DELETE_ON_ERROR",
            SpecialTarget::Ignore => "IGNORE",
            SpecialTarget::LowResolutionTime => "LOW_RESOLUTION_TIME",
            SpecialTarget::Silent => "SILENT",
            SpecialTarget::ExportAllVariables => "EXPORT_ALL_VARIABLES",
            SpecialTarget::NotParallel => "NOTPARALLEL",
            SpecialTarget::OneShell => "ONESHELL",
            SpecialTarget::Posix => "POSIX",
        }
    }

    pub fn add(&mut self, kind: SpecialTarget, targets: impl IntoIterator<Item = String>) {
        self.sets.entry(Self::key(kind)).or_default().add(targets);
    }

    pub fn contains(&self, kind: SpecialTarget, target: &str) -> bool {
        self.sets
            .get(Self::key(kind))
            .is_some_and(|set| set.contains(target))
    }

    pub fn set(&self, kind: SpecialTarget) -> Option<&SpecialTargetSet> {
        self.sets.get(Self::key(kind))
    }
}
