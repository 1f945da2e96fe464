//! Request path to filesystem path resolution, confined to a root directory.

use crate::error::{Error, Result};
use log::warn;
use percent_encoding::percent_decode_str;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A directory that request paths are resolved against and may never leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRoot {
    root: PathBuf,
}

impl SandboxRoot {
    /// Create a sandbox rooted at `root`.
    ///
    /// Relative roots are anchored at the current directory. An existing root
    /// is canonicalized so that watcher paths (which are reported with
    /// symlinks resolved) share its prefix.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            env::current_dir()?.join(root)
        };
        let root = match fs::canonicalize(&absolute) {
            Ok(canonical) => canonical,
            Err(_) => normalize_path(&absolute),
        };
        Ok(Self { root })
    }

    /// The normalized absolute root.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve an already-decoded request path.
    ///
    /// The empty path and `/` resolve to the root itself. Backslashes are
    /// treated as separators before normalization, so `..\..` is caught the
    /// same way as `../..`.
    pub fn resolve(&self, request_path: &str) -> Result<PathBuf> {
        if request_path.contains('\0') {
            warn!("Rejected request path containing NUL byte");
            return Err(Error::SandboxViolation);
        }

        let unified = request_path.replace('\\', "/");
        let trimmed = unified.trim_start_matches('/');
        if trimmed.is_empty() {
            return Ok(self.root.clone());
        }

        let normalized = normalize_path(&self.root.join(trimmed));
        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            warn!("Path traversal attempt: {:?}", request_path);
            Err(Error::SandboxViolation)
        }
    }

    /// Resolve a raw request URI path: strip the query, percent-decode, then
    /// resolve.
    pub fn resolve_uri(&self, raw: &str) -> Result<PathBuf> {
        self.resolve(&decode_request_path(raw))
    }

    /// Root-relative, forward-slash form of an absolute path under the root.
    ///
    /// Returns `Some("")` for the root itself and `None` for paths outside.
    pub fn relative_path(&self, absolute: &Path) -> Option<String> {
        let normalized = normalize_path(absolute);
        let rest = normalized.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rest
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    /// Whether `absolute` is the root itself.
    pub fn is_root(&self, absolute: &Path) -> bool {
        normalize_path(absolute) == self.root
    }
}

/// Strip the query/fragment from a request URI path and percent-decode it.
///
/// Decoding happens exactly once, before any normalization.
pub fn decode_request_path(raw: &str) -> String {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    percent_decode_str(&raw[..end])
        .decode_utf8_lossy()
        .into_owned()
}

/// Lexically collapse `.` and `..` components without touching the filesystem.
///
/// `..` at the top of an absolute path stays at the top, matching POSIX
/// path normalization.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
