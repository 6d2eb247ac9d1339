//! Top-level entry point: wires the parser, rule table, resolver,
//! discovery pass and runner together into a single `run(goals)` call.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::cache::Cache;
use crate::discover::discover;
use crate::error::RemakeError;
use crate::expand::{Expander, ExpandContext};
use crate::progress::Progress;
use crate::resolver::Resolver;
use crate::rule::{SpecialTarget, SpecialTargets};
use crate::ruletable::RuleTable;
use crate::runner::{Runner, RunnerOptions};
use crate::store::VariableStore;
use crate::value::{Origin, VariableValue};
use crate::world::{FileSystem, IncludeLoader, JobServer, Shell, VpathTable};

/// Everything `Engine::run` needs beyond the file/shell capabilities: which
/// makefile to read, which goals to build, and variables set on the
/// command line (highest precedence, short of `override`).
pub struct EngineOptions {
    pub makefile: PathBuf,
    pub directory: PathBuf,
    pub goals: Vec<String>,
    /// `NAME=value` pairs from the command line.
    pub command_line_vars: Vec<(String, String)>,
    /// `-e`: environment variables win over file assignments.
    pub env_overrides: bool,
    pub runner: RunnerOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            makefile: PathBuf::from("Makefile"),
            directory: PathBuf::from("."),
            goals: Vec::new(),
            command_line_vars: Vec::new(),
            env_overrides: false,
            runner: RunnerOptions::default(),
        }
    }
}

/// Capability bundle the embedder provides; `Engine::run` never reaches
/// for a global/host default on its own.
pub struct EngineWorld<'a> {
    pub fs: &'a dyn FileSystem,
    pub shell: &'a dyn Shell,
    pub shell_path: PathBuf,
    pub include_loader: &'a dyn IncludeLoader,
    pub jobserver: &'a dyn JobServer,
    pub progress: &'a dyn Progress,
    pub env: Vec<(String, String)>,
}

pub struct Engine<'a> {
    opts: EngineOptions,
    world: EngineWorld<'a>,
}

/// Outcome of a completed run: whether any recipe executed (or would have,
/// under `-n`/`-q`), plus accumulated `warning`/`info` text.
pub struct RunReport {
    pub did_work: bool,
    pub warnings: Vec<String>,
}

impl<'a> Engine<'a> {
    pub fn new(opts: EngineOptions, world: EngineWorld<'a>) -> Self {
        Self { opts, world }
    }

    pub fn run(&self) -> Result<RunReport, RemakeError> {
        let mut store = VariableStore::new();
        store.env_overrides = self.opts.env_overrides;
        install_defaults(&mut store, &self.opts, &self.world);

        let mut vpath = VpathTable::default();

        let warnings = std::cell::RefCell::new(Vec::new());
        let ctx = ExpandContext {
            shell: self.world.shell,
            shell_path: self.world.shell_path.clone(),
            fs: self.world.fs,
            cwd: self.opts.directory.clone(),
            env: self.world.env.clone(),
            warnings,
        };

        let (rules, scopes) = {
            let mut parser = crate::parser::Parser::new(&mut store, &ctx, &mut vpath, self.world.include_loader);
            parser.parse_file(&self.opts.makefile)?;
            (std::mem::take(&mut parser.rules), std::mem::take(&mut parser.scopes))
        };

        for (name, value) in &self.opts.command_line_vars {
            store.relabel_environment_override(name);
            store.set_raw(SmolStr::new(name), VariableValue::simple(value.clone(), Origin::CommandLine));
        }

        let expander = Expander::new(&store, &ctx);
        let special = collect_special_targets(&rules, &expander);
        let table = RuleTable::build(&rules, &scopes, &expander);
        let goals = self.resolve_goal_names(&rules, &expander);

        let resolver = Resolver::new(&table, self.world.fs);
        let path_resolver = crate::world::LocalPathResolver {
            table: &vpath,
            fs: self.world.fs,
        };

        let cache = Cache::new();
        let discovery = discover(&goals, &table, &resolver, &expander, &special, &path_resolver, &cache)?;

        let meta: IndexMap<_, _> = discovery.meta;

        let mut runner = Runner::new(
            &self.opts.runner,
            &discovery.graph,
            &meta,
            &store,
            &ctx,
            &special,
            self.world.fs,
            self.world.jobserver,
            self.world.progress,
            &cache,
        );

        let did_work = runner.run(&discovery.goal_ids).map_err(|detail| {
            RemakeError::Run(crate::error::RunError::RecipeFailed {
                target: goals.first().cloned().unwrap_or_default(),
                detail,
            })
        })?;

        Ok(RunReport {
            did_work,
            warnings: ctx.warnings.borrow().clone(),
        })
    }

    fn resolve_goal_names(&self, entries: &[crate::rule::RuleEntry], expander: &Expander<'_>) -> Vec<String> {
        if !self.opts.goals.is_empty() {
            return self.opts.goals.clone();
        }
        if let Some(default) = expander.lookup(".DEFAULT_GOAL")
            && !default.trim().is_empty()
        {
            return vec![default.trim().to_string()];
        }
        for entry in entries {
            let expanded = expander.expand(&entry.targets);
            for word in expanded.split_whitespace() {
                if word.starts_with('.') && SpecialTarget::from_name(&word[1..]).is_some() {
                    continue;
                }
                if word.contains('%') {
                    continue;
                }
                return vec![word.to_string()];
            }
        }
        Vec::new()
    }
}

fn install_defaults(store: &mut VariableStore, opts: &EngineOptions, world: &EngineWorld<'_>) {
    store.set_raw(SmolStr::new("CURDIR"), VariableValue::simple(opts.directory.display().to_string(), Origin::Default));
    store.set_raw(SmolStr::new("MAKE"), VariableValue::simple("make", Origin::Default));
    store.set_raw(SmolStr::new("SHELL"), VariableValue::simple(world.shell_path.display().to_string(), Origin::Default));
    store.set_raw(SmolStr::new("MAKESHELL"), VariableValue::simple(world.shell_path.display().to_string(), Origin::Default));
    store.set_raw(SmolStr::new("MAKE_VERSION"), VariableValue::simple(env!("CARGO_PKG_VERSION"), Origin::Default));
    store.set_raw(
        SmolStr::new("MAKE_HOST"),
        VariableValue::simple(format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS), Origin::Default),
    );
    store.set_raw(SmolStr::new("MAKEFLAGS"), VariableValue::simple("", Origin::Default));
    store.set_raw(SmolStr::new(".DEFAULT_GOAL"), VariableValue::simple("", Origin::Default));
    for (key, value) in &world.env {
        store.set_raw(SmolStr::new(key), VariableValue::simple(value.clone(), Origin::Environment));
    }
}

/// Scans every rule header's target word list for the twelve recognized
/// special targets, accumulating their (expanded) prerequisite words as
/// set members.
fn collect_special_targets(entries: &[crate::rule::RuleEntry], expander: &Expander<'_>) -> SpecialTargets {
    let mut special = SpecialTargets::default();
    for entry in entries {
        let targets = expander.expand(&entry.targets);
        for word in targets.split_whitespace() {
            let Some(name) = word.strip_prefix('.') else { continue };
            let Some(kind) = SpecialTarget::from_name(name) else { continue };
            let prereqs = expander.expand(&entry.prerequisites);
            let members: Vec<String> = prereqs.split_whitespace().map(str::to_string).collect();
            special.add(kind, members);
        }
    }
    special
}

pub fn default_env() -> Vec<(String, String)> {
    std::env::vars().collect()
}

pub fn makefile_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
