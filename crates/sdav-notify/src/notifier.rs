use crate::engine::{DispatchReport, SubscriptionEngine};
use crate::source::{RawEvent, SourceAdapter};
use log::trace;
use sdav_core::{normalize_path, ChangeKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Entry point for every change, whether it came from a WebDAV write or from
/// the filesystem watcher.
///
/// Writes performed by the server are also seen by the watcher. While a
/// write is in progress, and for `echo_window` after it finished, watcher
/// events at or below the written path are dropped, so each write produces
/// exactly one notification.
pub struct ChangeNotifier {
    adapter: Arc<SourceAdapter>,
    engine: Arc<SubscriptionEngine>,
    settle_delay: Duration,
    echo: EchoSuppressor,
}

impl ChangeNotifier {
    pub fn new(
        adapter: Arc<SourceAdapter>,
        engine: Arc<SubscriptionEngine>,
        settle_delay: Duration,
        echo_window: Duration,
    ) -> Self {
        Self {
            adapter,
            engine,
            settle_delay,
            echo: EchoSuppressor::new(echo_window),
        }
    }

    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// Mark `path` as being written by the server. Hold the guard until
    /// after [`emit`](Self::emit).
    pub fn begin(&self, path: &Path) -> WriteGuard<'_> {
        let path = normalize_path(path);
        self.echo.begin(&path);
        WriteGuard {
            echo: &self.echo,
            path,
        }
    }

    /// Report a completed WebDAV change. Waits the settle delay first.
    pub async fn emit(&self, kind: ChangeKind, absolute: &Path, is_dir: bool) -> Option<DispatchReport> {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        let size = if is_dir || kind == ChangeKind::Deleted {
            0
        } else {
            tokio::fs::metadata(absolute)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        };
        let event = self.adapter.adapt_direct(kind, absolute, size, is_dir)?;
        Some(self.engine.dispatch(&event))
    }

    /// Report a raw watcher event.
    pub async fn observe(&self, raw: RawEvent) -> Option<DispatchReport> {
        if self.echo.suppresses(&raw.path) {
            trace!("Suppressed watcher echo for {}", raw.path.display());
            return None;
        }
        let event = self.adapter.adapt(&raw).await?;
        Some(self.engine.dispatch(&event))
    }
}

/// Ends the in-progress marker when dropped.
pub struct WriteGuard<'a> {
    echo: &'a EchoSuppressor,
    path: PathBuf,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.echo.finish(&self.path);
    }
}

#[derive(Default)]
struct EchoState {
    active: HashMap<PathBuf, usize>,
    finished: HashMap<PathBuf, Instant>,
}

struct EchoSuppressor {
    window: Duration,
    state: Mutex<EchoState>,
}

impl EchoSuppressor {
    fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(EchoState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EchoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, path: &Path) {
        *self.lock().active.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    fn finish(&self, path: &Path) {
        let mut state = self.lock();
        if let Some(count) = state.active.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                state.active.remove(path);
            }
        }
        let now = Instant::now();
        let window = self.window;
        state.finished.retain(|_, at| now.duration_since(*at) < window);
        if !window.is_zero() {
            state.finished.insert(path.to_path_buf(), now);
        }
    }

    /// Whether `path` is, or lies below, a path the server is writing or has
    /// just written.
    fn suppresses(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        let state = self.lock();
        if state.active.keys().any(|p| path.starts_with(p)) {
            return true;
        }
        let now = Instant::now();
        state
            .finished
            .iter()
            .any(|(p, at)| path.starts_with(p) && now.duration_since(*at) < self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DeliveryError, NotificationSink, ObserverId};
    use crate::protocol::ServerMessage;
    use crate::source::RawKind;
    use sdav_core::SandboxRoot;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSink(Mutex<Vec<ServerMessage>>);

    impl NotificationSink for CountingSink {
        fn deliver(&self, _: ObserverId, message: ServerMessage) -> Result<(), DeliveryError> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn notifier(echo_window: Duration) -> (TempDir, Arc<CountingSink>, ChangeNotifier) {
        let dir = TempDir::new().unwrap();
        let sandbox = SandboxRoot::new(dir.path()).unwrap();
        let sink = Arc::new(CountingSink::default());
        let engine = Arc::new(SubscriptionEngine::new(sink.clone()));
        engine.subscribe(ObserverId::next(), "/");
        let adapter = Arc::new(SourceAdapter::new(sandbox, &[]));
        let notifier = ChangeNotifier::new(adapter, engine, Duration::ZERO, echo_window);
        (dir, sink, notifier)
    }

    #[tokio::test]
    async fn webdav_write_is_notified_once() {
        let (_dir, sink, notifier) = notifier(Duration::from_secs(5));
        let root = notifier.adapter.sandbox().path().to_path_buf();
        let file = root.join("a.txt");

        let guard = notifier.begin(&file);
        assert!(notifier.observe(RawEvent::new(RawKind::Add, &file)).await.is_none());
        std::fs::write(&file, b"abc").unwrap();
        let report = notifier.emit(ChangeKind::Created, &file, false).await.unwrap();
        drop(guard);
        assert_eq!(report.delivered, 1);

        // Late watcher events inside the window are echoes.
        assert!(notifier.observe(RawEvent::new(RawKind::Change, &file)).await.is_none());
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_directory_suppresses_child_echoes() {
        let (_dir, _sink, notifier) = notifier(Duration::from_secs(5));
        let root = notifier.adapter.sandbox().path().to_path_buf();
        let dir = root.join("d");
        drop(notifier.begin(&dir));
        assert!(notifier
            .observe(RawEvent::new(RawKind::Remove, dir.join("child.txt")))
            .await
            .is_none());
        assert!(notifier
            .observe(RawEvent::new(RawKind::Remove, root.join("dx.txt")))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn external_changes_pass_through() {
        let (_dir, sink, notifier) = notifier(Duration::from_secs(5));
        let file = notifier.adapter.sandbox().path().join("ext.txt");
        std::fs::write(&file, b"12345").unwrap();
        let report = notifier
            .observe(RawEvent::new(RawKind::Add, &file))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_window_only_suppresses_during_write() {
        let (_dir, _sink, notifier) = notifier(Duration::ZERO);
        let file = notifier.adapter.sandbox().path().join("b.txt");
        {
            let _guard = notifier.begin(&file);
            assert!(notifier.echo.suppresses(&file));
        }
        assert!(!notifier.echo.suppresses(&file));
    }
}
