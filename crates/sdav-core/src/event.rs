use crate::mime::guess_mime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// A file appeared.
    Created,
    /// An existing file was rewritten.
    Updated,
    /// A file (or, from a client `DELETE`, any resource) was removed.
    Deleted,
    /// A directory appeared.
    DirectoryCreated,
    /// A directory was removed.
    DirectoryDeleted,
}

impl ChangeKind {
    /// Wire name used in `fileChange` notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
            ChangeKind::DirectoryCreated => "directoryCreated",
            ChangeKind::DirectoryDeleted => "directoryDeleted",
        }
    }

    /// Whether the kind itself names a directory.
    pub fn is_directory(&self) -> bool {
        matches!(
            self,
            ChangeKind::DirectoryCreated | ChangeKind::DirectoryDeleted
        )
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized change, ready for pattern matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Absolute filesystem path.
    pub absolute_path: PathBuf,
    /// Forward-slash path relative to the sandbox root, no leading slash.
    pub relative_path: String,
    /// Size in bytes at the time the event was built (0 if unavailable).
    pub size: u64,
    /// MIME guess for file events, `None` for directories.
    pub mime_hint: Option<&'static str>,
}

impl ChangeEvent {
    /// Build an event, attaching a MIME hint unless it concerns a directory.
    pub fn new(
        kind: ChangeKind,
        absolute_path: PathBuf,
        relative_path: String,
        size: u64,
        is_dir: bool,
    ) -> Self {
        let mime_hint = if is_dir || kind.is_directory() {
            None
        } else {
            Some(guess_mime(&relative_path))
        };
        Self {
            kind,
            absolute_path,
            relative_path,
            size,
            mime_hint,
        }
    }
}
