//! Capability traits the engine is built against.
//!
//! The core never touches `std::fs`/`std::process`/`std::thread` directly;
//! every I/O or concurrency primitive is reached through one of the traits
//! below, so tests can swap in an in-memory [`FileSystem`] with controllable
//! timestamps. A `Local*` implementation of each trait is provided for
//! embedding against the real host, shaped after the teacher's `LocalWorld`.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::Command,
    sync::{Condvar, Mutex},
    time::SystemTime,
};

/// Stat/read/write access to the filesystem the build graph reasons about.
pub trait FileSystem: Send + Sync {
    /// Modification time of `path`, or `None` if it does not exist.
    fn timestamp(&self, path: &Path) -> Option<SystemTime>;

    /// Like [`Self::timestamp`], but for `checkSymlink` callers: the max of
    /// the link's own mtime and its target's.
    fn timestamp_checked_symlink(&self, path: &Path) -> Option<SystemTime> {
        self.timestamp(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.timestamp(path).is_some()
    }

    fn unlink(&self, path: &Path) -> io::Result<()>;
    fn touch(&self, path: &Path) -> io::Result<()>;
    fn read(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, append: bool, contents: &str) -> io::Result<()>;
    fn realpath(&self, path: &Path) -> io::Result<PathBuf>;
}

/// A chunk of a running recipe's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single command line to run, fully expanded.
pub struct ShellRequest<'a> {
    pub command_line: &'a str,
    pub cwd: &'a Path,
    pub env: &'a [(String, String)],
    /// The interpreter to invoke the command line with (`$(SHELL)`).
    pub shell: &'a Path,
    /// Suppresses the interpreter's own echo, where supported.
    pub silent: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Spawns a command line under a shell interpreter, streaming output.
pub trait Shell: Send + Sync {
    fn spawn(
        &self,
        req: &ShellRequest<'_>,
        on_output: &mut dyn FnMut(OutputStream, &[u8]),
    ) -> io::Result<ShellOutput>;
}

/// Runs `command_line` through `shell`, collapsing captured stdout the way
/// GNU Make does for `$(shell ...)`/`!=`: each embedded newline becomes a
/// single space, and trailing whitespace is dropped. Shared by the `shell`
/// function and the `!=` assignment operator so both record the same exit
/// code into `.SHELLEXIT` and agree on output formatting. A spawn failure
/// (interpreter missing, etc.) is reported as exit code 127, matching a
/// shell's own "command not found" convention.
pub fn run_shell_capture(
    shell: &dyn Shell,
    command_line: &str,
    shell_path: &Path,
    cwd: &Path,
    env: &[(String, String)],
) -> (String, i32) {
    let mut stdout = Vec::new();
    let req = ShellRequest {
        command_line,
        cwd,
        env,
        shell: shell_path,
        silent: true,
    };
    let result = shell.spawn(&req, &mut |stream, chunk| {
        if stream == OutputStream::Stdout {
            stdout.extend_from_slice(chunk);
        }
    });
    let exit_code = match &result {
        Ok(output) => output.exit_code.unwrap_or(-1),
        Err(_) => 127,
    };
    let text = String::from_utf8_lossy(&stdout);
    let collapsed = text.split('\n').collect::<Vec<_>>().join(" ").trim_end().to_string();
    (collapsed, exit_code)
}

/// The `vpath`/`VPATH` search used to locate a prerequisite that is not
/// directly reachable from the current directory.
pub trait PathResolver: Send + Sync {
    /// Returns an existing path that should stand in for `file`, if found.
    fn resolve(&self, file: &str) -> Option<PathBuf>;
}

/// Resolves and reads makefiles named by `include`/`-include`/`sinclude`.
pub trait IncludeLoader: Send + Sync {
    fn read(&self, file: &Path) -> io::Result<String>;
}

/// A bounded concurrency gate for recipe execution.
pub trait JobServer: Send + Sync {
    /// Blocks until a slot is available, returning a guard that releases it
    /// on drop. Acquiring must never allow more than `max` concurrent
    /// holders.
    fn acquire(&self) -> JobLock<'_>;
}

/// RAII guard for a [`JobServer`] slot.
pub struct JobLock<'a> {
    release: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a> JobLock<'a> {
    pub fn new(release: impl FnOnce() + 'a) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for JobLock<'_> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// The default, host-backed [`FileSystem`].
pub struct LocalFileSystem;
pub static LOCAL_FILE_SYSTEM: LocalFileSystem = LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn timestamp(&self, path: &Path) -> Option<SystemTime> {
        fs::symlink_metadata(path).ok()?.modified().ok()
    }

    fn timestamp_checked_symlink(&self, path: &Path) -> Option<SystemTime> {
        let link = fs::symlink_metadata(path).ok().and_then(|m| m.modified().ok());
        let target = fs::metadata(path).ok().and_then(|m| m.modified().ok());
        match (link, target) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn touch(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if self.exists(path) {
            let file = fs::OpenOptions::new().write(true).open(path)?;
            file.set_modified(SystemTime::now())
        } else {
            fs::File::create(path)?;
            Ok(())
        }
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, append: bool, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;
        file.write_all(contents.as_bytes())
    }

    fn realpath(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }
}

/// The default, host-backed [`Shell`]: spawns `shell -c "command_line"`.
pub struct LocalShell;
pub static LOCAL_SHELL: LocalShell = LocalShell;

impl Shell for LocalShell {
    fn spawn(
        &self,
        req: &ShellRequest<'_>,
        on_output: &mut dyn FnMut(OutputStream, &[u8]),
    ) -> io::Result<ShellOutput> {
        use std::io::Read;
        use std::process::Stdio;

        let mut cmd = Command::new(req.shell);
        cmd.arg("-c").arg(req.command_line);
        cmd.current_dir(req.cwd);
        cmd.env_clear();
        cmd.envs(req.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let mut stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        let mut buf = [0u8; 4096];
        loop {
            let n = stdout.read(&mut buf)?;
            if n == 0 {
                break;
            }
            on_output(OutputStream::Stdout, &buf[..n]);
        }
        loop {
            let n = stderr.read(&mut buf)?;
            if n == 0 {
                break;
            }
            on_output(OutputStream::Stderr, &buf[..n]);
        }

        let status = child.wait()?;
        Ok(ShellOutput {
            exit_code: status.code(),
        })
    }
}

/// The default [`IncludeLoader`], reading straight from the host filesystem.
pub struct LocalIncludeLoader;
pub static LOCAL_INCLUDE_LOADER: LocalIncludeLoader = LocalIncludeLoader;

impl IncludeLoader for LocalIncludeLoader {
    fn read(&self, file: &Path) -> io::Result<String> {
        fs::read_to_string(file)
    }
}

/// The `vpath`/`VPATH` table, searched in declaration order. Patterns are
/// anchored the way the parser installs them (`%` -> `.*?`).
#[derive(Default, Debug, Clone)]
pub struct VpathTable {
    entries: Vec<(String, regex::Regex, Vec<String>)>,
    global: Vec<String>,
}

impl VpathTable {
    pub fn clear(&mut self) {
        self.entries.clear();
        self.global.clear();
    }

    pub fn remove_pattern(&mut self, pattern: &str) {
        self.entries.retain(|(p, _, _)| p != pattern);
    }

    pub fn insert(&mut self, pattern: &str, dirs: Vec<String>) {
        let re = regex::Regex::new(&pattern_to_regex_str(pattern)).expect("valid vpath pattern");
        self.remove_pattern(pattern);
        self.entries.push((pattern.to_owned(), re, dirs));
    }

    pub fn set_global(&mut self, dirs: Vec<String>) {
        self.global = dirs;
    }

    fn candidates(&self, file: &str) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for (_, re, dirs) in &self.entries {
            if re.is_match(file) {
                for dir in dirs {
                    out.push(Path::new(dir).join(file));
                }
            }
        }
        for dir in &self.global {
            out.push(Path::new(dir).join(file));
        }
        out
    }
}

fn pattern_to_regex_str(pattern: &str) -> String {
    let escaped = regex::escape(pattern);
    format!("^{}$", escaped.replace("%", ")(.*?)("))
        .replacen(")(", "", 1)
        .replacen("(.*?)()", "(.*?)", 1)
}

/// [`PathResolver`] backed by a [`VpathTable`] and a [`FileSystem`].
pub struct LocalPathResolver<'a> {
    pub table: &'a VpathTable,
    pub fs: &'a dyn FileSystem,
}

impl PathResolver for LocalPathResolver<'_> {
    fn resolve(&self, file: &str) -> Option<PathBuf> {
        if self.fs.exists(Path::new(file)) {
            return None;
        }
        self.table
            .candidates(file)
            .into_iter()
            .find(|p| self.fs.exists(p))
    }
}

/// A counting-semaphore [`JobServer`] built on a mutex/condvar, mirroring the
/// bound the teacher enforces via `rayon::ThreadPoolBuilder::num_threads`.
pub struct LocalJobServer {
    max: usize,
    state: Mutex<usize>,
    cond: Condvar,
}

impl LocalJobServer {
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            state: Mutex::new(0),
            cond: Condvar::new(),
        }
    }
}

impl JobServer for LocalJobServer {
    fn acquire(&self) -> JobLock<'_> {
        let mut used = self.state.lock().expect("job server lock poisoned");
        while *used >= self.max {
            used = self.cond.wait(used).expect("job server lock poisoned");
        }
        *used += 1;
        drop(used);

        JobLock::new(move || {
            let mut used = self.state.lock().expect("job server lock poisoned");
            *used -= 1;
            self.cond.notify_one();
        })
    }
}
