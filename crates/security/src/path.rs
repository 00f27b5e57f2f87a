//! Path validation: filesystem sandboxing to the workspace roots.
//!
//! Relative paths resolve against the first root. Resolved paths must stay
//! under one of the roots and must not fall under a forbidden prefix.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the workspace")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to resolve path '{path}': {reason}")]
    ResolveFailed { path: String, reason: String },
}

/// The set of directories file tools may touch.
#[derive(Debug, Clone)]
pub struct Sandbox {
    roots: Vec<PathBuf>,
    forbidden: Vec<(String, PathBuf)>,
}

impl Sandbox {
    /// Roots are canonicalized when they exist so symlinked temp dirs compare
    /// correctly. An empty root list allows any path outside `forbidden`.
    pub fn new(roots: Vec<PathBuf>, forbidden: &[String]) -> Self {
        let roots = roots
            .into_iter()
            .map(|r| r.canonicalize().unwrap_or(r))
            .collect();
        let forbidden = forbidden
            .iter()
            .map(|f| {
                let raw = PathBuf::from(expand_tilde(f));
                let prefix = canonicalize_lenient(&raw).unwrap_or(raw);
                (f.clone(), prefix)
            })
            .collect();
        Self { roots, forbidden }
    }

    /// A sandbox rooted at a single directory.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self::new(vec![root.into()], &[])
    }

    /// The directory relative paths resolve against.
    pub fn workspace(&self) -> Option<&Path> {
        self.roots.first().map(PathBuf::as_path)
    }

    /// Resolve `path` and check it against the policy.
    ///
    /// Returns the absolute path on success. The target need not exist,
    /// which lets write tools validate new files.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        let expanded = PathBuf::from(expand_tilde(path));

        if expanded
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PathValidationError::PathTraversal { path: path.into() });
        }

        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            match self.workspace() {
                Some(root) => root.join(expanded),
                None => std::env::current_dir()
                    .map_err(|e| PathValidationError::ResolveFailed {
                        path: path.into(),
                        reason: e.to_string(),
                    })?
                    .join(expanded),
            }
        };

        let resolved = canonicalize_lenient(&absolute).map_err(|e| {
            PathValidationError::ResolveFailed {
                path: path.into(),
                reason: e.to_string(),
            }
        })?;

        for (pattern, prefix) in &self.forbidden {
            if resolved.starts_with(prefix) {
                return Err(PathValidationError::ForbiddenPath {
                    path: path.into(),
                    pattern: pattern.clone(),
                });
            }
        }

        if !self.roots.is_empty() && !self.roots.iter().any(|root| resolved.starts_with(root)) {
            return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
        }

        Ok(resolved)
    }
}

/// Canonicalize the longest existing ancestor and re-append the rest, so
/// symlinks in existing directories are resolved even for new files.
fn canonicalize_lenient(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return path.canonicalize();
    }
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Ok(path.to_path_buf()),
        }
    }
    let mut resolved = existing.canonicalize()?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}
