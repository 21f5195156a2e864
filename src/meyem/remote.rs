//! The remote namespace as a capability: list, delete, put.

use crate::error::MeyemError;
use crate::meyem::entry::remote_identity;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RemoteEntry {
    pub path: String,
    pub identity: String,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn new(path: impl Into<String>, is_dir: bool) -> Self {
        let path = path.into();
        let identity = remote_identity(&path);
        Self {
            path,
            identity,
            is_dir,
        }
    }
}

pub trait RemoteStore {
    /// Direct children of `dir`. A directory that does not exist lists empty.
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>>;
    /// Remove `path` and anything below it. Removing a missing path succeeds.
    fn delete(&self, path: &str) -> Result<()>;
    /// Store the contents of `source` at `path`.
    fn put(&self, path: &str, source: &Path) -> Result<()>;
}

pub fn join_remote(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Listing of `dir` without the entry named `exclude`, sorted by path.
pub fn list_excluding(
    store: &dyn RemoteStore,
    dir: &str,
    exclude: Option<&str>,
) -> Result<Vec<RemoteEntry>> {
    let mut entries = store
        .list(dir)?
        .into_iter()
        .filter(|entry| exclude.is_none_or(|name| name != entry.identity))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

/// A remote namespace backed by a plain directory, e.g. a mounted share.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    root: PathBuf,
}

impl MirrorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn local_path(&self, remote: &str) -> PathBuf {
        let relative = remote.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

impl RemoteStore for MirrorStore {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let local = self.local_path(dir);
        let read_dir = match fs::read_dir(&local) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(MeyemError::remote(dir, err).into()),
        };
        let mut out = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|err| MeyemError::remote(dir, err))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            out.push(RemoteEntry::new(join_remote(dir, &name), is_dir));
        }
        Ok(out)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let local = self.local_path(path);
        let result = if local.is_dir() {
            fs::remove_dir_all(&local)
        } else {
            fs::remove_file(&local)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MeyemError::remote(path, err).into()),
        }
    }

    fn put(&self, path: &str, source: &Path) -> Result<()> {
        let target = self.local_path(path);
        let parent = target
            .parent()
            .with_context(|| format!("remote path {path} has no parent"))?;
        fs::create_dir_all(parent).map_err(|err| MeyemError::remote(path, err))?;
        let mut staging = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(parent)
            .map_err(|err| MeyemError::remote(path, err))?;
        let mut reader = fs::File::open(source)
            .with_context(|| format!("failed to open {}", source.display()))?;
        std::io::copy(&mut reader, staging.as_file_mut())
            .map_err(|err| MeyemError::remote(path, err))?;
        staging
            .persist(&target)
            .map_err(|err| MeyemError::remote(path, err.error))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};

    /// In-memory store that records every mutation and can fail on demand.
    #[derive(Default)]
    pub struct MemoryStore {
        pub entries: RefCell<BTreeMap<String, bool>>,
        pub deleted: RefCell<Vec<String>>,
        pub uploaded: RefCell<Vec<String>>,
        pub failing: RefCell<BTreeSet<String>>,
        pub list_fails: RefCell<bool>,
    }

    impl MemoryStore {
        pub fn with(paths: &[(&str, bool)]) -> Self {
            let store = Self::default();
            for (path, is_dir) in paths {
                store.entries.borrow_mut().insert(path.to_string(), *is_dir);
            }
            store
        }

        pub fn fail_on(&self, path: &str) {
            self.failing.borrow_mut().insert(path.to_string());
        }

        pub fn paths(&self) -> Vec<String> {
            self.entries.borrow().keys().cloned().collect()
        }
    }

    impl RemoteStore for MemoryStore {
        fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
            if *self.list_fails.borrow() {
                return Err(MeyemError::remote(dir, "listing unavailable").into());
            }
            let prefix = format!("{}/", dir.trim_end_matches('/'));
            Ok(self
                .entries
                .borrow()
                .iter()
                .filter(|(path, _)| {
                    path.strip_prefix(&prefix)
                        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
                })
                .map(|(path, is_dir)| RemoteEntry::new(path.clone(), *is_dir))
                .collect())
        }

        fn delete(&self, path: &str) -> Result<()> {
            if self.failing.borrow().contains(path) {
                return Err(MeyemError::remote(path, "injected failure").into());
            }
            self.entries.borrow_mut().remove(path);
            self.deleted.borrow_mut().push(path.to_string());
            Ok(())
        }

        fn put(&self, path: &str, _source: &Path) -> Result<()> {
            if self.failing.borrow().contains(path) {
                return Err(MeyemError::remote(path, "injected failure").into());
            }
            self.entries.borrow_mut().insert(path.to_string(), false);
            self.uploaded.borrow_mut().push(path.to_string());
            Ok(())
        }
    }
}
