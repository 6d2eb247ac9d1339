//! Build graph execution: timestamp-driven rebuild decisions, parallel
//! scheduling over the discovered graph, and recipe dispatch. Adapted from
//! the teacher's `exec.rs` pending-input state machine, but there is no
//! persisted build database — staleness is decided purely from current
//! file timestamps (§4.G), and a "build" means running shell recipe
//! lines rather than invoking an opaque callback.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, mpsc},
    time::SystemTime,
};

use indexmap::{IndexMap, IndexSet};
use rayon::Scope;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::discover::NodeMeta;
use crate::expand::{Expander, ExpandContext};
use crate::graph::{BuildGraph, BuildId, BuildNode, RecipeLine};
use crate::progress::{Progress, ProgressConfig, ProgressStatus};
use crate::rule::{Scope as VarScope, SpecialTarget, SpecialTargets};
use crate::store::VariableStore;
use crate::value::{Origin, VariableValue};
use crate::world::{FileSystem, JobServer, ShellRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    DryRun,
    Question,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shuffle {
    Reverse,
    Seeded(u64),
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub mode: Mode,
    pub jobs: usize,
    pub keep_going: bool,
    /// `-B` / `always`: rebuild unconditionally.
    pub always_make: bool,
    /// `-i` / global `.IGNORE`-like behavior from the command line.
    pub ignore_errors: bool,
    /// `-s`: suppress recipe echo regardless of `@`/`.SILENT`.
    pub silent: bool,
    pub check_symlink: bool,
    pub shuffle: Option<Shuffle>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Normal,
            jobs: 1,
            keep_going: false,
            always_make: false,
            ignore_errors: false,
            silent: false,
            check_symlink: false,
            shuffle: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildStatusKind {
    Fresh,
    Started,
    UpToDate,
    Succeeded,
    Failed,
    Skipped,
}

impl BuildStatusKind {
    fn is_finished(self) -> bool {
        matches!(
            self,
            BuildStatusKind::UpToDate | BuildStatusKind::Failed | BuildStatusKind::Succeeded | BuildStatusKind::Skipped
        )
    }

    fn is_successful(self) -> bool {
        matches!(self, BuildStatusKind::UpToDate | BuildStatusKind::Succeeded)
    }
}

#[derive(Debug, Clone)]
struct BuildStatus {
    kind: BuildStatusKind,
    pending_inputs: usize,
}

struct SharedState<'a> {
    opts: &'a RunnerOptions,
    graph: &'a BuildGraph,
    meta: &'a IndexMap<BuildId, NodeMeta>,
    store: &'a VariableStore,
    ctx: &'a ExpandContext<'a>,
    special: &'a SpecialTargets,
    fs: &'a dyn FileSystem,
    jobserver: &'a dyn JobServer,
    progress: &'a dyn Progress,
    cache: &'a Cache,
    pool: rayon::ThreadPool,
    any_work: Mutex<bool>,
    first_error: Mutex<Option<String>>,
}

/// Drives recipe execution over a [`BuildGraph`] discovered for one run.
pub struct Runner<'a> {
    state: Arc<SharedState<'a>>,
    pending: IndexSet<BuildId>,
    builds: HashMap<BuildId, BuildStatus>,
    running: usize,
    finished: usize,
    failed: usize,
}

impl<'a> Runner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opts: &'a RunnerOptions,
        graph: &'a BuildGraph,
        meta: &'a IndexMap<BuildId, NodeMeta>,
        store: &'a VariableStore,
        ctx: &'a ExpandContext<'a>,
        special: &'a SpecialTargets,
        fs: &'a dyn FileSystem,
        jobserver: &'a dyn JobServer,
        progress: &'a dyn Progress,
        cache: &'a Cache,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.jobs.max(1))
            .build()
            .expect("failed to build recipe thread pool");
        Self {
            state: Arc::new(SharedState {
                opts,
                graph,
                meta,
                store,
                ctx,
                special,
                fs,
                jobserver,
                progress,
                cache,
                pool,
                any_work: Mutex::new(false),
                first_error: Mutex::new(None),
            }),
            pending: IndexSet::new(),
            builds: HashMap::new(),
            running: 0,
            finished: 0,
            failed: 0,
        }
    }

    /// Runs every goal and their transitive prerequisites. Returns whether
    /// any recipe ran (or would have, in dry-run/question mode) and, when
    /// `keep_going` masked a failure, the first error text encountered.
    pub fn run(&mut self, goals: &[BuildId]) -> Result<bool, String> {
        self.want(goals);

        self.state.progress.prepare(&ProgressConfig {
            max_threads: Some(self.state.opts.jobs),
        });

        let state = self.state.clone();
        let (tx, mut rx) = mpsc::channel::<BuildResult>();
        state.pool.in_place_scope(|pool| self.run_inner(pool, tx, &mut rx));
        drop(rx);

        self.state.progress.finish();

        if self.failed > 0 {
            let err = self
                .state
                .first_error
                .lock()
                .expect("lock poisoned")
                .clone()
                .unwrap_or_else(|| "build failed".to_string());
            return Err(err);
        }

        Ok(*self.state.any_work.lock().expect("lock poisoned"))
    }

    fn want(&mut self, goals: &[BuildId]) {
        let mut stack: Vec<BuildId> = goals.to_vec();
        while let Some(id) = stack.pop() {
            if self.builds.contains_key(&id) {
                continue;
            }
            let mut children = 0usize;
            for dep in self.state.graph.build_dependencies(id) {
                children += 1;
                stack.push(dep);
            }
            if children == 0 {
                self.pending.insert(id);
            }
            self.builds.insert(
                id,
                BuildStatus {
                    kind: BuildStatusKind::Fresh,
                    pending_inputs: children,
                },
            );
        }
    }

    fn run_inner<'scope>(&mut self, pool: &Scope<'scope>, tx: mpsc::Sender<BuildResult>, rx: &mut mpsc::Receiver<BuildResult>)
    where
        'a: 'scope,
    {
        loop {
            debug!(
                running = self.running,
                pending = self.pending.len(),
                finished = self.finished,
                total = self.builds.len(),
                "runner loop iteration"
            );

            let order = self.ordered_pending();
            self.pending.clear();
            for id in order {
                self.start(pool, tx.clone(), id);
            }

            if self.finished == self.builds.len() {
                break;
            }
            if self.failed > 0 && !self.state.opts.keep_going && self.running == 0 {
                break;
            }
            if self.running == 0 {
                if self.failed > 0 {
                    break;
                }
                panic!("no builds in progress but not all builds finished");
            }

            let msg = rx.recv().expect("sender kept alive while builds run");
            self.finish(msg);
        }
    }

    fn ordered_pending(&self) -> Vec<BuildId> {
        let mut order: Vec<BuildId> = self.pending.iter().copied().collect();
        match self.state.opts.shuffle {
            Some(Shuffle::Reverse) => order.reverse(),
            Some(Shuffle::Seeded(seed)) => {
                let mut state = seed.max(1);
                for i in (1..order.len()).rev() {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    let j = (state as usize) % (i + 1);
                    order.swap(i, j);
                }
            }
            None => {}
        }
        order
    }

    fn start<'scope>(&mut self, pool: &Scope<'scope>, tx: mpsc::Sender<BuildResult>, id: BuildId)
    where
        'a: 'scope,
    {
        if !self.state.opts.keep_going && self.failed > 0 {
            // A fatal failure already happened; don't start new work, but
            // let in-flight tasks settle per §5's cancellation policy.
            return;
        }

        let status = self.progress_status();
        self.state.progress.build_started(self.state.graph, id, &status);

        self.builds.get_mut(&id).expect("tracked build").kind = BuildStatusKind::Started;
        self.running += 1;

        let state = self.state.clone();
        pool.spawn(move |_| {
            let result = run_node(&state, id);
            let _ = tx.send(BuildResult { id, status: result });
        });
    }

    fn finish(&mut self, msg: BuildResult) {
        self.running -= 1;
        self.finished += 1;

        let build = self.builds.get_mut(&msg.id).expect("tracked build");
        build.kind = msg.status;

        match msg.status {
            BuildStatusKind::Succeeded | BuildStatusKind::UpToDate => {
                for dep in self.state.graph.build_dependents(msg.id) {
                    let Some(d) = self.builds.get_mut(&dep) else { continue };
                    if d.kind.is_finished() {
                        continue;
                    }
                    d.pending_inputs -= 1;
                    if d.pending_inputs == 0 {
                        self.pending.insert(dep);
                    }
                }
            }
            BuildStatusKind::Failed | BuildStatusKind::Skipped => {
                self.failed += 1;
                // Walk forward through dependents (the direction recipes
                // wait on, not the direction edges point) so a failure
                // skips everything downstream of it instead of upstream.
                let mut stack: Vec<BuildId> = self.state.graph.build_dependents(msg.id).collect();
                while let Some(node) = stack.pop() {
                    let already_finished = self.builds.get(&node).is_some_and(|d| d.kind.is_finished());
                    if already_finished {
                        continue;
                    }
                    if let Some(d) = self.builds.get_mut(&node) {
                        d.kind = BuildStatusKind::Skipped;
                        self.finished += 1;
                        self.failed += 1;
                    }
                    stack.extend(self.state.graph.build_dependents(node));
                }
            }
            _ => unreachable!("run_node only reports finished statuses"),
        }

        let status = self.progress_status();
        self.state
            .progress
            .build_finished(self.state.graph, msg.id, msg.status.is_successful(), &status);
    }

    fn progress_status(&self) -> ProgressStatus {
        ProgressStatus {
            total: self.builds.len(),
            started: self.running + self.finished,
            done: self.finished,
            failed: self.failed,
        }
    }
}

struct BuildResult {
    id: BuildId,
    status: BuildStatusKind,
}

fn run_node(state: &SharedState<'_>, id: BuildId) -> BuildStatusKind {
    let node = state.graph.lookup_build(id).expect("node exists");
    let meta = state.meta.get(&id);

    if node.barrier {
        return BuildStatusKind::UpToDate;
    }

    let target_mtimes: Vec<Option<SystemTime>> = node
        .outs
        .iter()
        .filter_map(|f| state.graph.lookup_path(*f))
        .map(|p| state.cache.timestamp(state.fs, p, state.opts.check_symlink))
        .collect();
    let target_mtime = if node.phony {
        None
    } else {
        target_mtimes.iter().copied().min().flatten()
    };

    if node.recipe.is_empty() {
        if node.phony {
            mark_work(state);
            return BuildStatusKind::Succeeded;
        }
        let exists = node.outs.iter().filter_map(|f| state.graph.lookup_path(*f)).all(|p| state.fs.exists(p));
        if exists {
            return BuildStatusKind::UpToDate;
        }
        let name = node.targets.first().map(|s| s.as_str()).unwrap_or("<unknown>");
        record_error(state, format!("no rule to make target `{name}`"));
        return BuildStatusKind::Failed;
    }

    let mut newer: Vec<&str> = Vec::new();
    let mut any_missing_prereq = false;
    for p in &node.prerequisites {
        let mtime = state.cache.timestamp(state.fs, std::path::Path::new(p), state.opts.check_symlink);
        match (mtime, target_mtime) {
            (None, _) => any_missing_prereq = true,
            (Some(m), Some(t)) if m > t => newer.push(p.as_str()),
            (Some(_), None) => newer.push(p.as_str()),
            _ => {}
        }
    }
    for p in &node.order_only {
        if state.cache.timestamp(state.fs, std::path::Path::new(p), state.opts.check_symlink).is_none() {
            any_missing_prereq = true;
        }
    }

    let needs_rebuild = state.opts.always_make || node.always_rebuild || target_mtime.is_none() || !newer.is_empty() || any_missing_prereq;

    if !needs_rebuild {
        return BuildStatusKind::UpToDate;
    }

    mark_work(state);

    match state.opts.mode {
        Mode::Question => BuildStatusKind::Succeeded,
        Mode::Touch => {
            for f in &node.outs {
                if let Some(p) = state.graph.lookup_path(*f)
                    && let Err(e) = state.fs.touch(p)
                {
                    record_error(state, format!("cannot touch {}: {e}", p.display()));
                    return BuildStatusKind::Failed;
                }
            }
            state.cache.invalidate();
            BuildStatusKind::Succeeded
        }
        Mode::Normal | Mode::DryRun => match run_recipe(state, id, node, meta, &newer) {
            Ok(()) => {
                state.cache.invalidate();
                BuildStatusKind::Succeeded
            }
            Err(e) => {
                record_error(state, e);
                let target = node.targets.first().map(|s| s.as_str()).unwrap_or_default();
                let delete_on_error = state.special.contains(SpecialTarget::DeleteOnError, target)
                    && !state.special.contains(SpecialTarget::Precious, target)
                    && !state.special.contains(SpecialTarget::Secondary, target);
                if delete_on_error {
                    for f in &node.outs {
                        if let Some(p) = state.graph.lookup_path(*f) {
                            let _ = state.fs.unlink(p);
                        }
                    }
                }
                BuildStatusKind::Failed
            }
        },
    }
}

fn mark_work(state: &SharedState<'_>) {
    *state.any_work.lock().expect("lock poisoned") = true;
}

fn record_error(state: &SharedState<'_>, msg: String) {
    warn!("{msg}");
    let mut slot = state.first_error.lock().expect("lock poisoned");
    if slot.is_none() {
        *slot = Some(msg);
    }
}

/// Binds automatic variables and runs the node's recipe lines (or, under
/// `.ONESHELL`, a single joined script), per §4.G steps 7-8.
fn run_recipe(state: &SharedState<'_>, id: BuildId, node: &BuildNode, meta: Option<&NodeMeta>, newer: &[&str]) -> Result<(), String> {
    let target = node.targets.first().map(|s| s.as_str()).unwrap_or_default();
    let ignore_all = state.opts.ignore_errors || state.special.contains(SpecialTarget::Ignore, target);
    let silence_all = state.opts.silent || state.special.contains(SpecialTarget::Silent, target);

    let overlay = automatic_vars_overlay(node, meta, target, newer);
    let expander = Expander::new(state.store, state.ctx).with(overlay);

    let lines: Vec<(String, &RecipeLine)> = node
        .recipe
        .iter()
        .map(|line| (expander.expand(&line.text), line))
        .collect();

    if node.oneshell {
        return run_oneshell(state, id, target, &lines, ignore_all, silence_all);
    }

    for (expanded, line) in &lines {
        if expanded.trim().is_empty() {
            continue;
        }
        let silent = silence_all || line.silent;
        if !silent {
            state.progress.stdout_line(state.graph, id, format!("{expanded}\n").as_bytes());
        }
        if state.opts.mode == Mode::DryRun && !line.always_run {
            continue;
        }
        let ignore = ignore_all || line.ignore_error;
        run_one(state, id, target, expanded, ignore)?;
    }
    Ok(())
}

fn run_oneshell(
    state: &SharedState<'_>,
    id: BuildId,
    target: &str,
    lines: &[(String, &RecipeLine)],
    ignore_all: bool,
    silence_all: bool,
) -> Result<(), String> {
    let mut script = String::new();
    for (expanded, line) in lines {
        if expanded.trim().is_empty() {
            continue;
        }
        let silent = silence_all || line.silent;
        if !silent {
            state.progress.stdout_line(state.graph, id, format!("{expanded}\n").as_bytes());
        }
        let ignore = ignore_all || line.ignore_error;
        if ignore {
            script.push_str(&format!("{{ {expanded}; }} || true\n"));
        } else {
            script.push_str(expanded);
            script.push('\n');
        }
    }
    if script.trim().is_empty() {
        return Ok(());
    }
    if state.opts.mode == Mode::DryRun && !lines.iter().any(|(_, l)| l.always_run) {
        return Ok(());
    }
    run_one(state, id, target, &script, false)
}

fn run_one(state: &SharedState<'_>, id: BuildId, target: &str, command_line: &str, ignore: bool) -> Result<(), String> {
    let _slot = state.jobserver.acquire();

    let cwd = state.ctx.cwd.clone();
    let env = state.ctx.env.clone();
    let shell_path = state.ctx.shell_path.clone();
    let req = ShellRequest {
        command_line,
        cwd: &cwd,
        env: &env,
        shell: &shell_path,
        silent: false,
    };

    let result = state.ctx.shell.spawn(&req, &mut |_stream, chunk| {
        state.progress.stdout_line(state.graph, id, chunk);
    });

    match result {
        Ok(output) if output.success() => Ok(()),
        Ok(output) if ignore => {
            info!(target, exit_code = ?output.exit_code, "recipe line failed but ignored");
            Ok(())
        }
        Ok(output) => Err(format!(
            "recipe for `{target}` failed (exit {:?}): {command_line}",
            output.exit_code
        )),
        Err(e) if ignore => {
            info!(target, error = %e, "recipe line failed to spawn but ignored");
            Ok(())
        }
        Err(e) => Err(format!("recipe for `{target}` failed to spawn: {e}")),
    }
}

fn automatic_vars_overlay(node: &BuildNode, meta: Option<&NodeMeta>, target: &str, newer: &[&str]) -> std::rc::Rc<VarScope> {
    let mut scope = meta.map(|m| (*m.scope).clone()).unwrap_or_default();

    let unique_prereqs = dedup_preserve_order(&node.prerequisites);
    let stem = meta.and_then(|m| m.stem.clone()).unwrap_or_default();

    let pairs = [
        ("@", target.to_string()),
        ("<", node.prerequisites.first().cloned().unwrap_or_default()),
        ("^", unique_prereqs.join(" ")),
        ("+", node.prerequisites.join(" ")),
        ("?", newer.join(" ")),
        ("|", node.order_only.join(" ")),
        ("*", stem),
    ];

    for (name, value) in &pairs {
        bind(&mut scope, name, value);
        bind(&mut scope, &format!("{name}D"), &dirname(value));
        bind(&mut scope, &format!("{name}F"), &basename(value));
    }

    std::rc::Rc::new(scope)
}

fn bind(scope: &mut VarScope, name: &str, value: &str) {
    scope.insert(name.into(), VariableValue::simple(value, Origin::Automatic));
}

fn dedup_preserve_order(words: &[String]) -> Vec<String> {
    let mut seen = IndexSet::new();
    for w in words {
        seen.insert(w.clone());
    }
    seen.into_iter().collect()
}

fn dirname(path: &str) -> String {
    match PathBuf::from(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    }
}

fn basename(path: &str) -> String {
    match PathBuf::from(path).file_name() {
        Some(n) => n.to_string_lossy().into_owned(),
        None => String::new(),
    }
}
