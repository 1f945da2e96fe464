//! Turns raw watcher events into [`ChangeEvent`]s.

use log::trace;
use sdav_core::{normalize_path, ChangeEvent, ChangeKind, SandboxRoot};
use std::path::{Path, PathBuf};

/// Directory names that never produce notifications.
const NOISE_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    "virtualenv",
    "env",
    "tmp",
    "temp",
    "__pycache__",
];

/// File extensions that never produce notifications.
const NOISE_EXTENSIONS: &[&str] = &["log", "tmp", "cache", "swp"];

/// Kind reported by the filesystem watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Add,
    Change,
    Remove,
    AddDir,
    RemoveDir,
}

impl RawKind {
    pub fn change_kind(self) -> ChangeKind {
        match self {
            RawKind::Add => ChangeKind::Created,
            RawKind::Change => ChangeKind::Updated,
            RawKind::Remove => ChangeKind::Deleted,
            RawKind::AddDir => ChangeKind::DirectoryCreated,
            RawKind::RemoveDir => ChangeKind::DirectoryDeleted,
        }
    }

    pub fn is_dir(self) -> bool {
        matches!(self, RawKind::AddDir | RawKind::RemoveDir)
    }
}

/// One raw watcher event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub path: PathBuf,
}

impl RawEvent {
    pub fn new<P: Into<PathBuf>>(kind: RawKind, path: P) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Filters and normalizes events for the subscription engine.
#[derive(Debug, Clone)]
pub struct SourceAdapter {
    sandbox: SandboxRoot,
    /// Empty means the whole root is watched.
    watch_paths: Vec<PathBuf>,
}

impl SourceAdapter {
    /// Relative watch paths are anchored at the root. A watch path equal to
    /// the root lifts the restriction.
    pub fn new(sandbox: SandboxRoot, watch_paths: &[PathBuf]) -> Self {
        let mut resolved: Vec<PathBuf> = watch_paths
            .iter()
            .map(|p| normalize_path(&sandbox.path().join(p)))
            .collect();
        if resolved.iter().any(|p| p == sandbox.path()) {
            resolved.clear();
        }
        Self {
            sandbox,
            watch_paths: resolved,
        }
    }

    pub fn sandbox(&self) -> &SandboxRoot {
        &self.sandbox
    }

    /// Directories to hand the OS watcher.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        if self.watch_paths.is_empty() {
            vec![self.sandbox.path().to_path_buf()]
        } else {
            self.watch_paths.clone()
        }
    }

    /// Dotfiles, dependency and cache directories, temp and log files, and
    /// editor backups.
    pub fn is_noise(&self, relative: &str) -> bool {
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let Some(last) = segments.last() else {
            return false;
        };

        if segments
            .iter()
            .any(|s| s.starts_with('.') || s.ends_with('~') || NOISE_DIRS.contains(s))
        {
            return true;
        }

        match last.rsplit_once('.') {
            Some((_, ext)) => NOISE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
            None => false,
        }
    }

    /// Whether `absolute` lies inside the configured watch set.
    pub fn is_watched(&self, absolute: &Path) -> bool {
        if self.watch_paths.is_empty() {
            return true;
        }
        let normalized = normalize_path(absolute);
        self.watch_paths.iter().any(|w| normalized.starts_with(w))
    }

    /// Adapt a watcher event: noise and watch-set filters both apply.
    pub async fn adapt(&self, raw: &RawEvent) -> Option<ChangeEvent> {
        let relative = self.relative(&raw.path)?;
        if self.is_noise(&relative) {
            trace!("Ignoring noise path {}", relative);
            return None;
        }
        if !self.is_watched(&raw.path) {
            return None;
        }
        let size = if raw.kind.is_dir() {
            0
        } else {
            file_size(&raw.path).await
        };
        Some(ChangeEvent::new(
            raw.kind.change_kind(),
            raw.path.clone(),
            relative,
            size,
            raw.kind.is_dir(),
        ))
    }

    /// Adapt a change made through the WebDAV handler. Client-chosen names
    /// are reported even if they look like noise.
    pub fn adapt_direct(
        &self,
        kind: ChangeKind,
        absolute: &Path,
        size: u64,
        is_dir: bool,
    ) -> Option<ChangeEvent> {
        let relative = self.relative(absolute)?;
        if !self.is_watched(absolute) {
            return None;
        }
        Some(ChangeEvent::new(
            kind,
            absolute.to_path_buf(),
            relative,
            size,
            is_dir,
        ))
    }

    /// Root-relative path; `None` for the root itself and anything outside.
    fn relative(&self, absolute: &Path) -> Option<String> {
        self.sandbox
            .relative_path(absolute)
            .filter(|rel| !rel.is_empty())
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
