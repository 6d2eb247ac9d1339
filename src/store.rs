//! The variable map: flavor/origin bookkeeping and the assignment operators.

use std::sync::atomic::{AtomicI32, Ordering};

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::debug;

use crate::value::{Origin, VariableValue};
use crate::world::{self, Shell};

/// The six assignment operators recognized in rule headers and makefile
/// bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Recursive,
    /// `:=` / `::=`
    Simple,
    /// `:::=`
    ImmediateEscaped,
    /// `?=`
    Conditional,
    /// `+=`
    Append,
    /// `!=`
    Shell,
}

/// A "computed" (builtin-backed) variable: reading/writing it round-trips
/// through an engine field instead of the stored string. `CURDIR`,
/// `.RECIPEPREFIX`, `.VARIABLES`, `.INCLUDE_DIRS`, `.FEATURES`, `.SUFFIXES`,
/// `VPATH`, `.DEFAULT_GOAL` are all of this kind; the store holds only the
/// marker, and `VariableStore::get`/`set` special-case `builtin` entries by
/// dispatching through this trait rather than replacing the descriptor.
pub trait ComputedVariable: Send + Sync {
    fn get(&self) -> String;
    fn set(&self, value: &str);
}

/// Insertion-ordered name -> value map, plus the live hooks for computed
/// variables and export tracking.
#[derive(Default)]
pub struct VariableStore {
    vars: IndexMap<SmolStr, VariableValue>,
    computed: IndexMap<SmolStr, Box<dyn ComputedVariable>>,
    /// `export` with no names: export every current and future variable.
    pub export_all: bool,
    /// `.EXPORT_ALL_VARIABLES` reproduces the source's current-scope
    /// snapshot (including automatics) rather than GNU Make's
    /// automatic-variable exclusion; see DESIGN.md open question 3.
    pub env_overrides: bool,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("vars", &self.vars)
            .field("export_all", &self.export_all)
            .field("env_overrides", &self.env_overrides)
            .finish()
    }
}

/// Backs `.SHELLEXIT`: written by `shell()`/`!=` through [`VariableStore::record_shell_exit`],
/// which only needs `&self` since `Expander` holds a shared reference to the store.
struct ShellExitVar(AtomicI32);

impl ComputedVariable for ShellExitVar {
    fn get(&self) -> String {
        self.0.load(Ordering::Relaxed).to_string()
    }

    fn set(&self, value: &str) {
        if let Ok(code) = value.trim().parse() {
            self.0.store(code, Ordering::Relaxed);
        }
    }
}

impl VariableStore {
    pub fn new() -> Self {
        let mut store = Self::default();
        store.install_computed(".SHELLEXIT", Box::new(ShellExitVar(AtomicI32::new(0))));
        store
    }

    /// Records the exit code of the most recent `shell()`/`!=` invocation.
    /// Takes `&self`: the `shell` function only ever sees the store through
    /// an `Expander`'s shared reference, so `.SHELLEXIT` has to be writable
    /// without `&mut self`.
    pub fn record_shell_exit(&self, code: i32) {
        if let Some(computed) = self.computed.get(".SHELLEXIT") {
            computed.set(&code.to_string());
        }
    }

    /// Installs a computed variable. Reads go through [`ComputedVariable::get`];
    /// the stored descriptor only carries origin/export metadata.
    pub fn install_computed(&mut self, name: impl Into<SmolStr>, computed: Box<dyn ComputedVariable>) {
        let name = name.into();
        let initial = computed.get();
        self.computed.insert(name.clone(), computed);
        let mut value = VariableValue::simple(initial, Origin::Default);
        value.builtin = true;
        self.vars.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(computed) = self.computed.get(name) {
            return Some(computed.get());
        }
        self.vars.get(name).map(|v| v.value.clone())
    }

    pub fn get_value(&self, name: &str) -> Option<&VariableValue> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(|s| s.as_str())
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.shift_remove(name);
        self.computed.shift_remove(name);
    }

    pub fn set_export(&mut self, name: &str, export: bool) {
        if let Some(v) = self.vars.get_mut(name) {
            v.export = export;
        }
    }

    pub fn set_private(&mut self, name: &str, private: bool) {
        if let Some(v) = self.vars.get_mut(name) {
            v.private = private;
        }
    }

    pub fn exported(&self) -> impl Iterator<Item = (&str, String)> {
        self.vars.iter().filter_map(move |(k, v)| {
            if self.export_all || v.export {
                Some((k.as_str(), self.get(k).unwrap_or_default()))
            } else {
                None
            }
        })
    }

    /// Inserts a fully-formed descriptor directly, bypassing operator
    /// semantics. Used to install automatic variables and scope overlays.
    pub fn set_raw(&mut self, name: impl Into<SmolStr>, value: VariableValue) {
        self.vars.insert(name.into(), value);
    }

    /// Implements the §4.B operation table, including origin precedence.
    ///
    /// `expanded_rhs` is `rhs` expanded once by the caller *before* calling
    /// `set` (the store itself never runs the expander, to keep the
    /// borrow checker happy — `set` needs `&mut self` while expansion needs
    /// `&VariableStore`). It is only consulted for the operators that call
    /// for immediate expansion (`:=`, `::=`, `:::=`, and `+=` onto a simple
    /// target); callers may pass an empty string for `=`/`?=`/`!=`, which
    /// never read it. `shell` runs the `!=` operator's command line.
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &mut self,
        name: &str,
        op: AssignOp,
        rhs: &str,
        expanded_rhs: &str,
        origin: Origin,
        shell: &dyn Shell,
        shell_path: &std::path::Path,
        cwd: &std::path::Path,
        env: &[(String, String)],
    ) {
        if let Some(computed) = self.computed.get(name) {
            let value = match op {
                AssignOp::Simple | AssignOp::ImmediateEscaped => expanded_rhs.to_string(),
                AssignOp::Shell => {
                    let (output, code) = world::run_shell_capture(shell, rhs, shell_path, cwd, env);
                    self.record_shell_exit(code);
                    output
                }
                _ => rhs.to_string(),
            };
            computed.set(&value);
            if let Some(v) = self.vars.get_mut(name) {
                v.value = computed.get();
            }
            return;
        }

        if !self.should_write(name, origin) {
            debug!(name, ?origin, "assignment skipped by origin precedence");
            return;
        }

        let existing = self.vars.get(name);

        match op {
            AssignOp::Recursive => {
                self.vars
                    .insert(name.into(), VariableValue::recursive(rhs, origin));
            }
            AssignOp::Simple => {
                self.vars
                    .insert(name.into(), VariableValue::simple(expanded_rhs, origin));
            }
            AssignOp::ImmediateEscaped => {
                let escaped = expanded_rhs.replace('$', "$$");
                self.vars
                    .insert(name.into(), VariableValue::recursive(escaped, origin));
            }
            AssignOp::Conditional => {
                if existing.is_none() {
                    self.vars
                        .insert(name.into(), VariableValue::recursive(rhs, origin));
                }
            }
            AssignOp::Append => match existing {
                None => {
                    self.vars
                        .insert(name.into(), VariableValue::recursive(rhs, origin));
                }
                Some(current) if current.recursive => {
                    let joined = join_with_space(&current.value, rhs);
                    let mut value = VariableValue::recursive(joined, current.origin);
                    value.private = current.private;
                    value.export = current.export;
                    self.vars.insert(name.into(), value);
                }
                Some(current) => {
                    let joined = join_with_space(&current.value, expanded_rhs);
                    let mut value = VariableValue::simple(joined, current.origin);
                    value.private = current.private;
                    value.export = current.export;
                    self.vars.insert(name.into(), value);
                }
            },
            AssignOp::Shell => {
                let (output, code) = world::run_shell_capture(shell, rhs, shell_path, cwd, env);
                self.record_shell_exit(code);
                self.vars
                    .insert(name.into(), VariableValue::simple(output, origin));
            }
        }
    }

    /// Origin precedence gate from §4.B, applied before any operator runs.
    fn should_write(&self, name: &str, new_origin: Origin) -> bool {
        let Some(current) = self.vars.get(name) else {
            return true;
        };
        if current.origin == Origin::CommandLine && new_origin != Origin::Override {
            return false;
        }
        if current.origin == Origin::Environment && new_origin == Origin::File && self.env_overrides {
            return false;
        }
        true
    }

    /// Relabels an environment-origin variable as `environment-override`
    /// when an `override`-prefixed assignment targets it, per §4.B.
    pub fn relabel_environment_override(&mut self, name: &str) {
        if let Some(v) = self.vars.get_mut(name)
            && v.origin == Origin::Environment
        {
            v.origin = Origin::EnvironmentOverride;
        }
    }
}

fn join_with_space(lhs: &str, rhs: &str) -> String {
    if lhs.is_empty() {
        rhs.to_string()
    } else if rhs.is_empty() {
        lhs.to_string()
    } else {
        format!("{lhs} {rhs}")
    }
}
