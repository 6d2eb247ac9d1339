//! Test doubles for the capability traits in `remake::world`, mirroring the
//! shape of the teacher's `MockWorld`: an in-memory filesystem with a
//! logical epoch clock standing in for real mtimes, and a shell that logs
//! every command line it was asked to run instead of actually running it.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use remake::world::{FileSystem, IncludeLoader, JobServer, JobLock, OutputStream, Shell, ShellOutput, ShellRequest};

/// A mock [`FileSystem`] that works entirely in-memory, with mtimes driven
/// by a monotonically increasing epoch rather than the real clock.
pub struct MockFileSystem {
    inner: Mutex<MockFsInner>,
}

struct MockFsInner {
    epoch: u64,
    files: HashMap<PathBuf, u64>,
    contents: HashMap<PathBuf, String>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockFsInner {
                epoch: 0,
                files: HashMap::new(),
                contents: HashMap::new(),
            }),
        }
    }

    /// Marks `path` as existing, bumping its mtime to a fresh epoch.
    pub fn touch_file(&self, path: impl AsRef<Path>) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.files.insert(path.as_ref().to_owned(), epoch);
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(path.as_ref());
    }

    pub fn epoch_of(&self, path: impl AsRef<Path>) -> Option<u64> {
        self.inner.lock().unwrap().files.get(path.as_ref()).copied()
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn timestamp(&self, path: &Path) -> Option<SystemTime> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(path).map(|epoch| UNIX_EPOCH + Duration::from_secs(*epoch))
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        self.inner.lock().unwrap().files.remove(path);
        Ok(())
    }

    fn touch(&self, path: &Path) -> io::Result<()> {
        self.touch_file(path);
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        self.inner
            .lock()
            .unwrap()
            .contents
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }

    fn write(&self, path: &Path, append: bool, contents: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.files.insert(path.to_owned(), epoch);
        if append {
            inner.contents.entry(path.to_owned()).or_default().push_str(contents);
        } else {
            inner.contents.insert(path.to_owned(), contents.to_owned());
        }
        Ok(())
    }

    fn realpath(&self, path: &Path) -> io::Result<PathBuf> {
        Ok(path.to_owned())
    }
}

/// Every recipe line the mock shell was asked to run, in execution order.
#[derive(Debug, Clone)]
pub struct MockExecResult {
    pub command_line: String,
}

type MockCallback = Box<dyn Fn(&str) -> io::Result<ShellOutput> + Send + Sync>;

/// A mock [`Shell`] that records every command line instead of running it.
pub struct MockShell {
    inner: Mutex<MockShellInner>,
}

struct MockShellInner {
    log: Vec<MockExecResult>,
    callback: Option<MockCallback>,
}

impl MockShell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockShellInner {
                log: Vec::new(),
                callback: None,
            }),
        }
    }

    pub fn take_log(&self) -> Vec<MockExecResult> {
        std::mem::take(&mut self.inner.lock().unwrap().log)
    }

    /// Makes every recipe whose command line contains `needle` fail.
    pub fn fail_on(&self, needle: &str) {
        let needle = needle.to_string();
        self.set_callback(Box::new(move |cmd| {
            if cmd.contains(&needle) {
                Ok(ShellOutput { exit_code: Some(1) })
            } else {
                Ok(ShellOutput { exit_code: Some(0) })
            }
        }));
    }

    pub fn set_callback(&self, callback: MockCallback) {
        self.inner.lock().unwrap().callback = Some(callback);
    }
}

impl Default for MockShell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell for MockShell {
    fn spawn(&self, req: &ShellRequest<'_>, on_output: &mut dyn FnMut(OutputStream, &[u8])) -> io::Result<ShellOutput> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(MockExecResult {
            command_line: req.command_line.to_string(),
        });
        let outcome = match &inner.callback {
            Some(cb) => cb(req.command_line)?,
            None => ShellOutput { exit_code: Some(0) },
        };
        drop(inner);
        let _ = on_output;
        Ok(outcome)
    }
}

/// An [`IncludeLoader`] backed by a fixed in-memory file table, standing in
/// both for the root makefile and any `include`d files.
pub struct MockIncludeLoader {
    files: HashMap<PathBuf, String>,
}

impl MockIncludeLoader {
    pub fn new(files: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        Self {
            files: files.into_iter().map(|(k, v)| (PathBuf::from(k), v.to_string())).collect(),
        }
    }
}

impl IncludeLoader for MockIncludeLoader {
    fn read(&self, file: &Path) -> io::Result<String> {
        self.files
            .get(file)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such mock file: {}", file.display())))
    }
}

/// An unbounded [`JobServer`]: every `acquire` succeeds immediately.
pub struct MockJobServer;

impl JobServer for MockJobServer {
    fn acquire(&self) -> JobLock<'_> {
        JobLock::new(|| {})
    }
}
