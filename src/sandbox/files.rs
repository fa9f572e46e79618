//! Sandboxed filesystem operations used by the tool layer and the scaffolder.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::path::PathSandbox;
use crate::errors::SandboxError;

/// One entry of a recursive directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the listing root, `/`-separated
    pub path: String,
    pub is_dir: bool,
    /// Size in bytes, files only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// File operations confined to a root directory.
#[derive(Debug, Clone)]
pub struct FileSandbox {
    paths: PathSandbox,
}

impl FileSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathSandbox::new(root),
        }
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    pub fn paths(&self) -> &PathSandbox {
        &self.paths
    }

    pub async fn read_text(&self, relative: &str) -> Result<String, SandboxError> {
        let path = self.paths.resolve(relative)?;
        let display = relative.to_string();
        blocking(move || {
            if !path.is_file() {
                return Err(SandboxError::path(display, "file does not exist"));
            }
            let bytes = std::fs::read(&path).map_err(|e| SandboxError::io(&path, e))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
        .await
    }

    /// Write `content` to `relative`, creating parent directories.
    /// With `overwrite == false` an existing file is left untouched and the
    /// call fails.
    pub async fn write_text(
        &self,
        relative: &str,
        content: &str,
        overwrite: bool,
    ) -> Result<(), SandboxError> {
        let path = self.paths.resolve(relative)?;
        if path == self.paths.real_root()? {
            return Err(SandboxError::path(relative, "cannot write to the sandbox root"));
        }
        let display = relative.to_string();
        let content = content.to_string();
        blocking(move || {
            if path.exists() && !overwrite {
                return Err(SandboxError::path(
                    display,
                    "refusing to overwrite existing file",
                ));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SandboxError::io(parent, e))?;
            }
            std::fs::write(&path, content).map_err(|e| SandboxError::io(&path, e))
        })
        .await
    }

    /// Write several files in order, stopping at the first failure.
    pub async fn write_many<'a, I>(&self, files: I, overwrite: bool) -> Result<(), SandboxError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (relative, content) in files {
            self.write_text(relative, content, overwrite).await?;
        }
        Ok(())
    }

    pub async fn create_directory(&self, relative: &str) -> Result<(), SandboxError> {
        let path = self.paths.resolve(relative)?;
        blocking(move || std::fs::create_dir_all(&path).map_err(|e| SandboxError::io(&path, e)))
            .await
    }

    /// Recursively list `relative` (the root when `None`), sorted by path.
    /// Entry paths are relative to the sandbox root.
    pub async fn list_directory(
        &self,
        relative: Option<&str>,
    ) -> Result<Vec<FileEntry>, SandboxError> {
        let relative = relative.unwrap_or("");
        let target = self.paths.resolve(relative)?;
        let real_root = self.paths.real_root()?;
        let display = if relative.is_empty() { "." } else { relative }.to_string();

        blocking(move || {
            if !target.exists() {
                return Err(SandboxError::path(display, "directory does not exist"));
            }
            if !target.is_dir() {
                return Err(SandboxError::path(display, "path is not a directory"));
            }
            walk_entries(&target, &real_root, &[]).map_err(|e| SandboxError::io(&target, e))
        })
        .await
    }
}

/// Walk `dir` without following symlinks, pruning directories named in
/// `excluded`, and return entries relative to `base` sorted by path.
pub(crate) fn walk_entries(
    dir: &Path,
    base: &Path,
    excluded: &[String],
) -> std::io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && excluded
                    .iter()
                    .any(|name| entry.file_name().to_string_lossy() == name.as_str()))
        });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        let Ok(relative) = entry.path().strip_prefix(base) else {
            continue;
        };
        let metadata = entry.metadata().map_err(std::io::Error::other)?;
        let is_dir = metadata.is_dir();
        entries.push(FileEntry {
            path: relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            is_dir,
            size: (!is_dir).then_some(metadata.len()),
            updated_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

async fn blocking<T, F>(f: F) -> Result<T, SandboxError>
where
    F: FnOnce() -> Result<T, SandboxError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| SandboxError::Io {
        path: PathBuf::new(),
        source: std::io::Error::other(e),
    })?
}
