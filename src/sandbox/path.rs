//! Path containment for every caller-controlled relative path.
//!
//! Resolution happens in two passes. The lexical pass normalizes `.` and
//! `..` and rejects anything that climbs above the root. The real pass
//! canonicalizes the deepest existing ancestor of the candidate and checks
//! the result against the canonical root, which catches symlinks that point
//! outside the sandbox. Non-existent tails are allowed so writes can target
//! new files.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::errors::SandboxError;

/// Maximum accepted length of a caller-supplied path.
const MAX_PATH_LEN: usize = 4096;

/// Resolves relative paths against a fixed root directory.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root exactly as configured (not canonicalized).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical location of the root. Fails if the root does not exist.
    pub fn real_root(&self) -> Result<PathBuf, SandboxError> {
        std::fs::canonicalize(&self.root).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SandboxError::path(
                    self.root.display().to_string(),
                    "sandbox root does not exist",
                )
            } else {
                SandboxError::io(&self.root, e)
            }
        })
    }

    /// Resolve `relative` to an absolute path inside the root.
    ///
    /// An empty path (or `.`) resolves to the root itself. Absolute inputs are
    /// accepted only when they normalize under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let resolved = self.resolve_inner(relative);
        if let Err(SandboxError::PathValidation { reason, .. }) = &resolved {
            tracing::warn!(
                path = %relative,
                root = %self.root.display(),
                reason = %reason,
                "Rejected path outside sandbox"
            );
        }
        resolved
    }

    fn resolve_inner(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        if relative.len() > MAX_PATH_LEN {
            return Err(SandboxError::path(truncate(relative), "path too long"));
        }
        if relative.contains('\0') {
            return Err(SandboxError::path(relative, "path contains a NUL byte"));
        }

        let real_root = self.real_root()?;
        let candidate = Path::new(relative);

        let inside = if candidate.is_absolute() {
            self.strip_root(candidate, &real_root)
                .ok_or_else(|| SandboxError::path(relative, "absolute path outside sandbox root"))?
        } else {
            normalize_relative(candidate)
                .ok_or_else(|| SandboxError::path(relative, "path escapes sandbox root"))?
        };

        let joined = real_root.join(&inside);
        let real = canonicalize_existing_prefix(&joined)
            .map_err(|reason| SandboxError::path(relative, reason))?;

        if !real.starts_with(&real_root) {
            return Err(SandboxError::path(
                relative,
                "path resolves outside sandbox root",
            ));
        }
        Ok(real)
    }

    /// Normalize an absolute path and return its remainder under the root,
    /// trying both the configured and the canonical spelling of the root.
    fn strip_root(&self, absolute: &Path, real_root: &Path) -> Option<PathBuf> {
        let normalized = normalize_absolute(absolute);
        let configured = std::path::absolute(&self.root)
            .map(|p| normalize_absolute(&p))
            .ok();

        [Some(real_root.to_path_buf()), configured]
            .into_iter()
            .flatten()
            .find_map(|root| normalized.strip_prefix(&root).ok().map(Path::to_path_buf))
    }

    /// Express an absolute path already inside the sandbox relative to the
    /// root, with `/` separators.
    pub fn relative_display(&self, absolute: &Path) -> Option<String> {
        let real_root = self.real_root().ok()?;
        let rel = absolute.strip_prefix(&real_root).ok()?;
        Some(
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

/// Lexically normalize a relative path. Returns `None` if a `..` would climb
/// above the starting directory.
fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().collect())
}

/// Lexically normalize an absolute path; `..` at the top stays at the top.
fn normalize_absolute(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Canonicalize the deepest ancestor of `path` that exists on disk (the
/// entry itself, not its target) and re-attach the non-existent tail.
///
/// A dangling symlink exists as an entry but cannot be canonicalized; it is
/// rejected because writing through it would create its target.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf, String> {
    for ancestor in path.ancestors() {
        match std::fs::symlink_metadata(ancestor) {
            Ok(_) => {
                let real = std::fs::canonicalize(ancestor)
                    .map_err(|e| format!("cannot resolve '{}': {}", ancestor.display(), e))?;
                let tail = path
                    .strip_prefix(ancestor)
                    .map_err(|_| "internal path prefix mismatch".to_string())?;
                return Ok(if tail.as_os_str().is_empty() {
                    real
                } else {
                    real.join(tail)
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(format!("cannot inspect '{}': {}", ancestor.display(), e)),
        }
    }
    Err("no existing ancestor".to_string())
}

fn truncate(s: &str) -> String {
    s.chars().take(64).collect::<String>() + "..."
}
