use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[clap(name = "remake", version, author, about = "A GNU-Make-compatible build tool")]
pub struct Args {
    /// Targets to build, or NAME=value variable assignments
    pub goals: Vec<String>,

    /// Read FILE as the makefile
    #[clap(short = 'f', long = "file", name = "FILE")]
    pub makefile: Option<PathBuf>,

    /// Change to DIR before reading the makefile or doing anything else
    #[clap(short = 'C', long = "directory", name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Run N recipes in parallel (default: 1)
    #[clap(short = 'j', long = "jobs", name = "N")]
    pub jobs: Option<usize>,

    /// Print the recipes that would run, without running them
    #[clap(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Keep going as far as possible after a recipe fails
    #[clap(short = 'k', long = "keep-going")]
    pub keep_going: bool,

    /// Don't echo recipe lines before running them
    #[clap(short = 's', long = "silent")]
    pub silent: bool,

    /// Exit with a nonzero status if any target is out of date, without rebuilding
    #[clap(short = 'q', long = "question")]
    pub question: bool,

    /// Touch targets instead of running their recipe
    #[clap(short = 't', long = "touch")]
    pub touch: bool,

    /// Unconditionally rebuild every target reached from the goals
    #[clap(short = 'B', long = "always-make")]
    pub always_make: bool,

    /// Ignore nonzero exit statuses from recipes
    #[clap(short = 'i', long = "ignore-errors")]
    pub ignore_errors: bool,

    /// Variables from the environment override assignments made in makefiles
    #[clap(short = 'e', long = "environment-overrides")]
    pub env_overrides: bool,
}

/// A `NAME=value` pair lifted out of the positional argument list, or a
/// target to build. GNU Make interleaves these freely on the command line.
pub enum Goal {
    Var(String, String),
    Target(String),
}

pub fn classify_goals(goals: &[String]) -> Vec<Goal> {
    goals
        .iter()
        .map(|word| match word.split_once('=') {
            Some((name, value)) if is_plausible_var_name(name) => Goal::Var(name.to_string(), value.to_string()),
            _ => Goal::Target(word.clone()),
        })
        .collect()
}

fn is_plausible_var_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(char::is_whitespace)
}
