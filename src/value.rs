//! The value half of the variable model: flavor, origin and provenance.

/// Provenance of a variable binding.
///
/// Forms a precedence lattice used by [`crate::store::VariableStore::set`]:
/// command-line beats file; override beats file and command-line;
/// environment is shadowed by file unless `env_overrides` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Undefined,
    Default,
    Environment,
    EnvironmentOverride,
    File,
    CommandLine,
    Override,
    Automatic,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Undefined => "undefined",
            Origin::Default => "default",
            Origin::Environment => "environment",
            Origin::EnvironmentOverride => "environment override",
            Origin::File => "file",
            Origin::CommandLine => "command line",
            Origin::Override => "override",
            Origin::Automatic => "automatic",
        }
    }
}

/// A single variable binding.
#[derive(Debug, Clone)]
pub struct VariableValue {
    pub value: String,
    pub origin: Origin,
    /// `true` for recursive (`=`) flavor: re-expanded on every read.
    /// `false` for simple (`:=`) flavor: frozen at assignment time.
    pub recursive: bool,
    /// Hidden from the scope handed down to prerequisites.
    pub private: bool,
    pub export: bool,
    /// Backed by a live engine field (`CURDIR`, `.RECIPEPREFIX`, ...); such
    /// entries are updated in place rather than replaced wholesale, per
    /// the "computed variable" design note.
    pub builtin: bool,
}

impl VariableValue {
    pub fn new(value: impl Into<String>, origin: Origin, recursive: bool) -> Self {
        Self {
            value: value.into(),
            origin,
            recursive,
            private: false,
            export: false,
            builtin: false,
        }
    }

    pub fn simple(value: impl Into<String>, origin: Origin) -> Self {
        Self::new(value, origin, false)
    }

    pub fn recursive(value: impl Into<String>, origin: Origin) -> Self {
        Self::new(value, origin, true)
    }

    pub fn builtin(value: impl Into<String>) -> Self {
        let mut v = Self::new(value, Origin::Default, false);
        v.builtin = true;
        v
    }

    pub fn flavor(&self) -> &'static str {
        if self.recursive { "recursive" } else { "simple" }
    }
}
