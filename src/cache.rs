//! Run-scoped timestamp and path-resolution cache.
//!
//! The teacher persisted build metadata across runs in `db::ExecDb`
//! (redb/heed + bincode). This engine drops that persistence — GNU Make
//! itself never keeps a build database, deciding staleness purely from
//! current file timestamps — so `Cache` only memoizes *within* a single
//! `Engine::run` call, and is cleared after every successful recipe per
//! §5 ("timestamp and path caches live for one run; they are cleared
//! immediately after any successful recipe completes").

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
    time::SystemTime,
};

use crate::world::FileSystem;

/// A synthetic timestamp override installed by `assumeOld`/`assumeNew`.
#[derive(Debug, Clone, Copy)]
enum Override {
    /// `assumeNew`: always treated as infinitely new.
    New,
    /// `assumeOld`: always treated as infinitely old (but still "existing").
    Old,
}

#[derive(Default)]
struct Inner {
    timestamps: HashMap<PathBuf, Option<SystemTime>>,
    resolved: HashMap<String, Option<PathBuf>>,
    overrides: HashMap<PathBuf, Override>,
}

/// Caches [`FileSystem::timestamp`] and [`crate::world::PathResolver`]
/// lookups for the duration of one run.
pub struct Cache {
    inner: Mutex<Inner>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn assume_new(&self, path: impl Into<PathBuf>) {
        self.inner
            .lock()
            .expect("cache lock poisoned")
            .overrides
            .insert(path.into(), Override::New);
    }

    pub fn assume_old(&self, path: impl Into<PathBuf>) {
        self.inner
            .lock()
            .expect("cache lock poisoned")
            .overrides
            .insert(path.into(), Override::Old);
    }

    /// Returns the comparison-ready timestamp for `path`: `None` means
    /// "missing", honoring any `assumeOld`/`assumeNew` override first.
    pub fn timestamp(&self, fs: &dyn FileSystem, path: &Path, check_symlink: bool) -> Option<SystemTime> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if let Some(over) = inner.overrides.get(path) {
            return Some(match over {
                Override::New => SystemTime::now() + std::time::Duration::from_secs(365 * 24 * 3600),
                Override::Old => SystemTime::UNIX_EPOCH,
            });
        }
        if let Some(cached) = inner.timestamps.get(path) {
            return *cached;
        }
        let value = if check_symlink {
            fs.timestamp_checked_symlink(path)
        } else {
            fs.timestamp(path)
        };
        inner.timestamps.insert(path.to_owned(), value);
        value
    }

    pub fn resolve(&self, resolver: &dyn crate::world::PathResolver, file: &str) -> Option<PathBuf> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if let Some(cached) = inner.resolved.get(file) {
            return cached.clone();
        }
        let value = resolver.resolve(file);
        inner.resolved.insert(file.to_owned(), value.clone());
        value
    }

    /// Drops timestamp and path-resolution memoization. Called after every
    /// successful recipe, since it may have created or mutated files that
    /// the resolver or a later rebuild decision needs to see fresh.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.timestamps.clear();
        inner.resolved.clear();
    }
}
