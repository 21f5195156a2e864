use crate::error::MeyemError;
use anyhow::Result;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A named entry in the local namespace. `identity` is the basename and the
/// only key used to match against the remote namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LocalEntry {
    pub path: PathBuf,
    pub identity: String,
}

impl LocalEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let identity = local_identity(&path);
        Self { path, identity }
    }
}

/// Basename of a local path, ignoring trailing separators and `.` segments.
pub fn local_identity(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .next_back()
        .unwrap_or_default()
}

/// Basename of a `/`-separated remote path.
pub fn remote_identity(path: &str) -> String {
    path.split('/')
        .rfind(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Sorted listing of `dir`, leaving out entries whose identity is `exclude`.
pub fn list_local(dir: &Path, exclude: Option<&str>) -> Result<Vec<LocalEntry>> {
    let read_dir = fs::read_dir(dir).map_err(|err| MeyemError::filesystem(dir, err))?;
    let mut out = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|err| MeyemError::filesystem(dir, err))?;
        let local = LocalEntry::new(entry.path());
        if exclude.is_some_and(|name| name == local.identity) {
            continue;
        }
        out.push(local);
    }
    out.sort();
    Ok(out)
}

/// Sorted timelapse artifacts in `dir`: visible files ending in `extension`.
/// In-flight staging files are hidden and never listed.
pub fn list_artifacts(dir: &Path, extension: &str) -> Result<Vec<LocalEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    Ok(list_local(dir, None)?
        .into_iter()
        .filter(|entry| !entry.identity.starts_with('.'))
        .filter(|entry| entry.identity.ends_with(extension))
        .filter(|entry| entry.path.is_file())
        .collect())
}
