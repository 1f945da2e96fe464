//! OS filesystem watcher feeding the change notifier.

use crate::notifier::ChangeNotifier;
use crate::source::{RawEvent, RawKind};
use log::{debug, info, warn};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

/// Raw events buffered between the watcher thread and the pump task.
const RAW_EVENT_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create watcher: {0}")]
    Watcher(#[from] notify::Error),
}

/// A running recursive watcher and the task that drains it.
///
/// Dropping the watcher stops OS notifications, which in turn ends the pump.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    pump: JoinHandle<()>,
    roots: Vec<PathBuf>,
}

impl FsWatcher {
    /// Watch `roots` recursively and forward events to `notifier`.
    ///
    /// Events arriving within `debounce` of the first one in a burst are
    /// collapsed per path (see [`coalesce`]) before they are forwarded.
    /// Must be called inside a tokio runtime. Roots that do not exist are
    /// skipped with a warning.
    pub fn start(
        roots: Vec<PathBuf>,
        notifier: Arc<ChangeNotifier>,
        debounce: Duration,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel::<RawEvent>(RAW_EVENT_BUFFER);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in translate(&event) {
                    // Runs on the watcher's own thread.
                    if tx.blocking_send(raw).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("Watcher error: {}", e),
        })?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.exists() {
                warn!("Watch path {} does not exist, skipping", root.display());
                continue;
            }
            watcher.watch(&root, RecursiveMode::Recursive)?;
            info!("Watching {}", root.display());
            watched.push(root);
        }

        let pump = tokio::spawn(pump(rx, notifier, debounce));

        Ok(Self {
            _watcher: watcher,
            pump,
            roots: watched,
        })
    }

    /// Directories actually being watched.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(mut rx: mpsc::Receiver<RawEvent>, notifier: Arc<ChangeNotifier>, debounce: Duration) {
    let mut open = true;
    while open {
        let Some(first) = rx.recv().await else {
            break;
        };
        let mut burst = vec![first];
        let deadline = Instant::now() + debounce;
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(raw)) => burst.push(raw),
                Ok(None) => {
                    open = false;
                    break;
                }
                Err(_) => break,
            }
        }

        for raw in coalesce(burst) {
            debug!("Watcher: {:?} {}", raw.kind, raw.path.display());
            notifier.observe(raw).await;
        }
    }
    debug!("Watcher pump exiting");
}

/// Collapse a burst of raw events so each path reports its net change once.
///
/// A file that is created and then written is one `Add`; one that appears
/// and disappears within the burst reports nothing. Order of first
/// appearance is kept.
pub fn coalesce(burst: Vec<RawEvent>) -> Vec<RawEvent> {
    let mut slots: Vec<Option<RawEvent>> = Vec::with_capacity(burst.len());
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    for raw in burst {
        let Some(&at) = index.get(&raw.path) else {
            index.insert(raw.path.clone(), slots.len());
            slots.push(Some(raw));
            continue;
        };
        let Some(prev) = slots[at].as_ref().map(|e| e.kind) else {
            continue;
        };
        match merge(prev, raw.kind) {
            Some(kind) => {
                slots[at] = Some(RawEvent::new(kind, raw.path));
            }
            None => {
                slots[at] = None;
                index.remove(&raw.path);
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// Net effect of `prev` followed by `next` on the same path; `None` when
/// they cancel out.
fn merge(prev: RawKind, next: RawKind) -> Option<RawKind> {
    use RawKind::*;
    match (prev, next) {
        (Add, Change) => Some(Add),
        (Add, Remove) | (AddDir, RemoveDir) => None,
        (Remove, Add) | (Remove, Change) => Some(Change),
        (Change, Add) => Some(Change),
        (_, next) => Some(next),
    }
}

/// Map a notify event onto zero or more raw events.
pub fn translate(event: &Event) -> Vec<RawEvent> {
    let each = |kind: RawKind| -> Vec<RawEvent> {
        event
            .paths
            .iter()
            .map(|p| RawEvent::new(kind, p.clone()))
            .collect()
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) => each(RawKind::AddDir),
        EventKind::Create(CreateKind::File) => each(RawKind::Add),
        EventKind::Create(_) => event.paths.iter().map(|p| appeared(p)).collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(RawKind::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(|p| appeared(p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![
                RawEvent::new(RawKind::Remove, event.paths[0].clone()),
                appeared(&event.paths[1]),
            ]
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    appeared(p)
                } else {
                    RawEvent::new(RawKind::Remove, p.clone())
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| RawEvent::new(RawKind::Change, p.clone()))
            .collect(),

        EventKind::Remove(RemoveKind::Folder) => each(RawKind::RemoveDir),
        EventKind::Remove(_) => each(RawKind::Remove),

        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn appeared(path: &Path) -> RawEvent {
    let kind = if path.is_dir() {
        RawKind::AddDir
    } else {
        RawKind::Add
    };
    RawEvent::new(kind, path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&Path]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(p.to_path_buf());
        }
        event
    }

    #[test]
    fn creates_and_removes_map_directly() {
        let file = Path::new("/srv/a.txt");
        let dir = Path::new("/srv/d");
        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::File), &[file])),
            vec![RawEvent::new(RawKind::Add, file)]
        );
        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::Folder), &[dir])),
            vec![RawEvent::new(RawKind::AddDir, dir)]
        );
        assert_eq!(
            translate(&event(EventKind::Remove(RemoveKind::Folder), &[dir])),
            vec![RawEvent::new(RawKind::RemoveDir, dir)]
        );
        assert_eq!(
            translate(&event(EventKind::Remove(RemoveKind::File), &[file])),
            vec![RawEvent::new(RawKind::Remove, file)]
        );
    }

    #[test]
    fn data_modification_is_a_change() {
        let file = Path::new("/srv/a.txt");
        assert_eq!(
            translate(&event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &[file]
            )),
            vec![RawEvent::new(RawKind::Change, file)]
        );
    }

    #[test]
    fn metadata_and_access_are_ignored() {
        let file = Path::new("/srv/a.txt");
        assert!(translate(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)),
            &[file]
        ))
        .is_empty());
        assert!(translate(&event(EventKind::Access(AccessKind::Any), &[file])).is_empty());
    }

    #[test]
    fn create_then_write_is_one_add() {
        let a = Path::new("/srv/a.txt");
        let b = Path::new("/srv/b.txt");
        let burst = vec![
            RawEvent::new(RawKind::Add, a),
            RawEvent::new(RawKind::Change, b),
            RawEvent::new(RawKind::Change, a),
            RawEvent::new(RawKind::Change, a),
            RawEvent::new(RawKind::Change, b),
        ];
        assert_eq!(
            coalesce(burst),
            vec![RawEvent::new(RawKind::Add, a), RawEvent::new(RawKind::Change, b)]
        );
    }

    #[test]
    fn transient_entries_cancel_out() {
        let tmp = Path::new("/srv/scratch");
        let kept = Path::new("/srv/kept.txt");
        let burst = vec![
            RawEvent::new(RawKind::AddDir, tmp),
            RawEvent::new(RawKind::Add, kept),
            RawEvent::new(RawKind::RemoveDir, tmp),
        ];
        assert_eq!(coalesce(burst), vec![RawEvent::new(RawKind::Add, kept)]);

        // Reappearing after cancelling starts a fresh entry.
        let burst = vec![
            RawEvent::new(RawKind::Add, kept),
            RawEvent::new(RawKind::Remove, kept),
            RawEvent::new(RawKind::Add, kept),
        ];
        assert_eq!(coalesce(burst), vec![RawEvent::new(RawKind::Add, kept)]);
    }

    #[test]
    fn replace_in_place_is_a_change() {
        let file = Path::new("/srv/doc.txt");
        let burst = vec![
            RawEvent::new(RawKind::Remove, file),
            RawEvent::new(RawKind::Add, file),
        ];
        assert_eq!(coalesce(burst), vec![RawEvent::new(RawKind::Change, file)]);
    }

    #[test]
    fn rename_both_is_remove_then_add() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("old.txt");
        let to = temp.path().join("new.txt");
        std::fs::write(&to, b"x").unwrap();

        let raw = translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[&from, &to],
        ));
        assert_eq!(
            raw,
            vec![
                RawEvent::new(RawKind::Remove, &from),
                RawEvent::new(RawKind::Add, &to)
            ]
        );
    }
}
