//! Mock-environment integration tests for the engine, in the spirit of the
//! teacher's `tests/mock_tests.rs`: small, targeted scenarios driven
//! through a recorded-command mock shell rather than real subprocesses.

mod mock;

use std::{path::PathBuf, sync::Arc};

use remake::{Engine, EngineOptions, EngineWorld, Mode, NoopProgress, RunnerOptions};

use mock::{MockFileSystem, MockIncludeLoader, MockJobServer, MockShell};

/// Builds an [`Engine`] over `makefile_text`, wires a shell callback that
/// honors `touch $@`-style recipes by touching the named files in the mock
/// filesystem, and returns the engine plus its fixtures so the caller can
/// inspect the shell's command log / filesystem state afterward.
struct Harness {
    fs: Arc<MockFileSystem>,
    shell: Arc<MockShell>,
    loader: MockIncludeLoader,
    jobserver: MockJobServer,
}

impl Harness {
    fn new(makefile_text: &'static str) -> Self {
        let fs = Arc::new(MockFileSystem::new());
        let shell = Arc::new(MockShell::new());
        let touch_fs = fs.clone();
        shell.set_callback(Box::new(move |cmd| {
            for word in cmd.split_whitespace() {
                if let Some(rest) = word.strip_prefix("touch:") {
                    touch_fs.touch_file(rest);
                }
            }
            Ok(remake::world::ShellOutput { exit_code: Some(0) })
        }));
        Self {
            fs,
            shell,
            loader: MockIncludeLoader::new([("Makefile", makefile_text)]),
            jobserver: MockJobServer,
        }
    }

    fn run(&self, goals: Vec<String>, runner: RunnerOptions) -> remake::RemakeError {
        self.run_ok(goals, runner).unwrap_err()
    }

    fn run_ok(&self, goals: Vec<String>, runner: RunnerOptions) -> Result<remake::RunReport, remake::RemakeError> {
        let opts = EngineOptions {
            makefile: PathBuf::from("Makefile"),
            directory: PathBuf::from("."),
            goals,
            command_line_vars: Vec::new(),
            env_overrides: false,
            runner,
        };
        let world = EngineWorld {
            fs: self.fs.as_ref(),
            shell: self.shell.as_ref(),
            shell_path: PathBuf::from("/bin/sh"),
            include_loader: &self.loader,
            jobserver: &self.jobserver,
            progress: &NoopProgress,
            env: Vec::new(),
        };
        Engine::new(opts, world).run()
    }
}

const BUILD_MAKEFILE: &str = "\
all: foo.o bar.o
\ttouch:all

foo.o: foo.c
\ttouch:foo.o

bar.o: bar.c
\ttouch:bar.o
";

#[test]
fn builds_every_out_of_date_target_once() {
    let h = Harness::new(BUILD_MAKEFILE);
    h.fs.touch_file("foo.c");
    h.fs.touch_file("bar.c");

    let report = h.run_ok(vec!["all".to_string()], RunnerOptions::default()).unwrap();
    assert!(report.did_work);

    let log = h.shell.take_log();
    let commands: Vec<_> = log.iter().map(|e| e.command_line.clone()).collect();
    assert_eq!(commands.len(), 3, "expected exactly one recipe run per target, got {commands:?}");

    let link_pos = commands.iter().position(|c| c.contains("touch:all")).unwrap();
    let foo_pos = commands.iter().position(|c| c.contains("touch:foo.o")).unwrap();
    let bar_pos = commands.iter().position(|c| c.contains("touch:bar.o")).unwrap();
    assert!(link_pos > foo_pos && link_pos > bar_pos, "all must run after its prerequisites: {commands:?}");
}

#[test]
fn up_to_date_targets_are_not_rebuilt() {
    let h = Harness::new(BUILD_MAKEFILE);
    h.fs.touch_file("foo.c");
    h.fs.touch_file("bar.c");
    h.fs.touch_file("foo.o");
    h.fs.touch_file("bar.o");
    h.fs.touch_file("all");

    let report = h.run_ok(vec!["all".to_string()], RunnerOptions::default()).unwrap();
    assert!(!report.did_work);
    assert!(h.shell.take_log().is_empty());
}

#[test]
fn dry_run_never_invokes_the_shell() {
    let h = Harness::new(BUILD_MAKEFILE);
    h.fs.touch_file("foo.c");
    h.fs.touch_file("bar.c");

    let opts = RunnerOptions {
        mode: Mode::DryRun,
        ..RunnerOptions::default()
    };
    let report = h.run_ok(vec!["all".to_string()], opts).unwrap();
    assert!(report.did_work, "dry run still reports that work would happen");
    assert!(h.shell.take_log().is_empty(), "dry run must not invoke the shell");
}

// Neither body touches `all` in the mock filesystem, so each `::` rule's
// rebuild decision depends only on its own prerequisite, never on whatever
// the sibling rule may have already done to the shared target — both must
// run regardless of scheduling order.
const DOUBLE_COLON_MAKEFILE: &str = "\
all:: a.stamp
\tmark:a

all:: b.stamp
\tmark:b
";

#[test]
fn double_colon_rules_run_independently() {
    let h = Harness::new(DOUBLE_COLON_MAKEFILE);
    h.fs.touch_file("a.stamp");
    h.fs.touch_file("b.stamp");

    h.run_ok(vec!["all".to_string()], RunnerOptions::default()).unwrap();
    let log = h.shell.take_log();
    assert_eq!(log.len(), 2, "each :: rule body runs on its own, got {log:?}");
}

const FAILING_MAKEFILE: &str = "\
all: a.o b.o
\ttouch:all

a.o: a.c
\tfalse

b.o: b.c
\ttouch:b.o
";

#[test]
fn keep_going_runs_independent_siblings_after_a_failure() {
    let h = Harness::new(FAILING_MAKEFILE);
    h.fs.touch_file("a.c");
    h.fs.touch_file("b.c");
    let touch_fs = h.fs.clone();
    h.shell.set_callback(Box::new(move |cmd| {
        if cmd.contains("false") {
            return Ok(remake::world::ShellOutput { exit_code: Some(1) });
        }
        for word in cmd.split_whitespace() {
            if let Some(rest) = word.strip_prefix("touch:") {
                touch_fs.touch_file(rest);
            }
        }
        Ok(remake::world::ShellOutput { exit_code: Some(0) })
    }));

    let opts = RunnerOptions {
        keep_going: true,
        ..RunnerOptions::default()
    };
    h.run(vec!["all".to_string()], opts);

    let log = h.shell.take_log();
    let commands: Vec<_> = log.iter().map(|e| e.command_line.clone()).collect();
    assert!(commands.iter().any(|c| c.contains("touch:b.o")), "b.o's independent recipe should still run: {commands:?}");
    assert!(!commands.iter().any(|c| c.contains("touch:all")), "all must not run once a.o failed: {commands:?}");
}

#[test]
fn touching_an_input_after_first_build_triggers_rebuild() {
    let h = Harness::new(BUILD_MAKEFILE);
    h.fs.touch_file("foo.c");
    h.fs.touch_file("bar.c");

    let report = h.run_ok(vec!["all".to_string()], RunnerOptions::default()).unwrap();
    assert!(report.did_work);
    h.shell.take_log();

    h.fs.touch_file("foo.c");
    let report = h.run_ok(vec!["all".to_string()], RunnerOptions::default()).unwrap();
    assert!(report.did_work, "touching foo.c should trigger a rebuild");

    let log = h.shell.take_log();
    let commands: Vec<_> = log.iter().map(|e| e.command_line.clone()).collect();
    assert!(commands.iter().any(|c| c.contains("touch:foo.o")), "foo.o must rebuild from its touched input: {commands:?}");
    assert!(commands.iter().any(|c| c.contains("touch:all")), "all must rebuild transitively: {commands:?}");
    assert!(!commands.iter().any(|c| c.contains("touch:bar.o")), "bar.o's input was untouched: {commands:?}");
}

#[test]
fn removing_an_output_forces_a_rebuild() {
    let h = Harness::new(BUILD_MAKEFILE);
    h.fs.touch_file("foo.c");
    h.fs.touch_file("bar.c");
    h.run_ok(vec!["all".to_string()], RunnerOptions::default()).unwrap();
    h.shell.take_log();

    h.fs.remove_file("foo.o");
    let report = h.run_ok(vec!["all".to_string()], RunnerOptions::default()).unwrap();
    assert!(report.did_work);

    let log = h.shell.take_log();
    let commands: Vec<_> = log.iter().map(|e| e.command_line.clone()).collect();
    assert!(commands.iter().any(|c| c.contains("touch:foo.o")), "a missing output must be rebuilt: {commands:?}");
}

const MISSING_INPUT_MAKEFILE: &str = "\
all: missing.txt
\ttouch:all
";

#[test]
fn missing_input_with_no_rule_fails_without_running_anything() {
    let h = Harness::new(MISSING_INPUT_MAKEFILE);
    h.run(vec!["all".to_string()], RunnerOptions::default());
    assert!(
        h.shell.take_log().is_empty(),
        "no recipe should run once a prerequisite with no rule is found missing"
    );
}
