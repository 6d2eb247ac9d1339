use std::path::PathBuf;

use clap::Parser;

use remake::world::{LocalFileSystem, LocalIncludeLoader, LocalJobServer, LocalShell};
use remake::{Engine, EngineOptions, EngineWorld, Mode, RunnerOptions};

mod cli;

use cli::{Args, Goal, classify_goals};

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let goals = classify_goals(&args.goals);

    let mut targets = Vec::new();
    let mut command_line_vars = Vec::new();
    for goal in goals {
        match goal {
            Goal::Var(name, value) => command_line_vars.push((name, value)),
            Goal::Target(target) => targets.push(target),
        }
    }

    let directory = args.directory.unwrap_or_else(|| PathBuf::from("."));
    let makefile = args.makefile.unwrap_or_else(|| directory.join("Makefile"));

    let mode = match (args.question, args.touch, args.dry_run) {
        (true, _, _) => Mode::Question,
        (_, true, _) => Mode::Touch,
        (_, _, true) => Mode::DryRun,
        _ => Mode::Normal,
    };

    let opts = EngineOptions {
        makefile,
        directory,
        goals: targets,
        command_line_vars,
        env_overrides: args.env_overrides,
        runner: RunnerOptions {
            mode,
            jobs: args.jobs.unwrap_or(1).max(1),
            keep_going: args.keep_going,
            always_make: args.always_make,
            ignore_errors: args.ignore_errors,
            silent: args.silent,
            check_symlink: false,
            shuffle: None,
        },
    };

    let fs = LocalFileSystem;
    let shell = LocalShell;
    let include_loader = LocalIncludeLoader;
    let jobserver = LocalJobServer::new(opts.runner.jobs);

    let progress: Box<dyn remake::Progress> = if args.silent {
        Box::new(remake::NoopProgress)
    } else {
        Box::new(remake::progress::fancy::FancyConsoleProgress::new())
    };

    let world = EngineWorld {
        fs: &fs,
        shell: &shell,
        shell_path: PathBuf::from("/bin/sh"),
        include_loader: &include_loader,
        jobserver: &jobserver,
        progress: progress.as_ref(),
        env: std::env::vars().collect(),
    };

    let engine = Engine::new(opts, world);
    match engine.run() {
        Ok(report) => {
            for warning in &report.warnings {
                eprintln!("remake: {warning}");
            }
            if !report.did_work {
                println!("remake: nothing to be done");
            }
        }
        Err(err) => {
            eprintln!("remake: {err}");
            std::process::exit(2);
        }
    }
}
