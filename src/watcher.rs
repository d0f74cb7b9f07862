use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{HistoryError, Result};
use crate::pasteboard::{Pasteboard, Snapshot};
use crate::storage::HistoryStore;

pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Decides whether a capture from this source application is kept at all
/// (e.g. drop everything copied out of a password manager).
pub type CopyFilter = dyn Fn(&str) -> bool + Send + Sync;

/// Decides whether a parsed snapshot is kept, typically by category.
pub type ParsedFilter = dyn Fn(&Snapshot) -> bool + Send + Sync;

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Polls the pasteboard change counter on a dedicated thread and hands
/// accepted captures to the history store. Persistence failures on the
/// capture path are logged and swallowed; a lost capture is preferable to a
/// stalled poll loop.
pub struct ClipboardWatcher {
    pasteboard: Arc<dyn Pasteboard>,
    store: Arc<dyn HistoryStore>,
    on_copy: Arc<CopyFilter>,
    on_parsed: Arc<ParsedFilter>,
    interval: Duration,
    worker: Option<Worker>,
}

impl ClipboardWatcher {
    pub fn new(pasteboard: Arc<dyn Pasteboard>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            pasteboard,
            store,
            on_copy: Arc::new(|_| true),
            on_parsed: Arc::new(|_| true),
            interval: POLL_INTERVAL,
            worker: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_on_copy(&mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) {
        self.on_copy = Arc::new(filter);
    }

    pub fn set_on_parsed(&mut self, filter: impl Fn(&Snapshot) -> bool + Send + Sync + 'static) {
        self.on_parsed = Arc::new(filter);
    }

    pub fn is_armed(&self) -> bool {
        self.worker.is_some()
    }

    /// Arms the polling timer. An already armed watcher is shut down and
    /// re-armed.
    pub fn listen(&mut self) -> Result<()> {
        if self.worker.is_some() {
            self.shutdown()?;
        }

        let running = Arc::new(AtomicBool::new(true));
        let pasteboard = Arc::clone(&self.pasteboard);
        let store = Arc::clone(&self.store);
        let on_copy = Arc::clone(&self.on_copy);
        let on_parsed = Arc::clone(&self.on_parsed);
        let interval = self.interval;
        let flag = Arc::clone(&running);
        // Baseline taken before the worker starts, so a change landing
        // between arm and first tick is still observed.
        let mut last_change = self.pasteboard.change_count();

        let handle = thread::Builder::new()
            .name("cliphist-watcher".to_string())
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    tick(
                        pasteboard.as_ref(),
                        store.as_ref(),
                        on_copy.as_ref(),
                        on_parsed.as_ref(),
                        &mut last_change,
                    );
                    thread::sleep(interval);
                }
            })
            .map_err(|e| HistoryError::Watcher(e.to_string()))?;

        self.worker = Some(Worker { running, handle });
        Ok(())
    }

    /// Disarms the timer and waits for an in-flight tick to finish. Fails
    /// with `NotArmed` when there is no worker to stop.
    pub fn shutdown(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or(HistoryError::NotArmed)?;
        worker.running.store(false, Ordering::Relaxed);
        let _ = worker.handle.join();
        Ok(())
    }
}

fn tick(
    pasteboard: &dyn Pasteboard,
    store: &dyn HistoryStore,
    on_copy: &CopyFilter,
    on_parsed: &ParsedFilter,
    last_change: &mut u64,
) {
    let current = pasteboard.change_count();
    if current == *last_change {
        return;
    }
    // Re-read the counter together with the snapshot so a change landing
    // mid-read surfaces again on the next tick instead of being lost.
    *last_change = pasteboard.change_count();

    let snapshot = match pasteboard.read() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return,
        Err(e) => {
            debug!("clipboard read failed: {e}");
            return;
        }
    };

    if !on_copy(&snapshot.source_app) {
        debug!(source_app = %snapshot.source_app, "capture rejected by source filter");
        return;
    }
    if !on_parsed(&snapshot) {
        debug!(category = snapshot.category.as_str(), "capture rejected by content filter");
        return;
    }

    if let Err(e) = store.upsert(snapshot.into_entry()) {
        warn!("failed to persist capture: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pasteboard::{KIND_TEXT, Payload, SnapshotItem};
    use crate::storage::models::{
        Category, HistoryEntry, NewEntry, PagedResult, SearchFilter,
    };
    use crate::storage::sqlite::SqliteStore;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU64;

    struct FakePasteboard {
        counter: AtomicU64,
        snapshot: Mutex<Option<Snapshot>>,
    }

    impl FakePasteboard {
        fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
                snapshot: Mutex::new(None),
            }
        }

        fn place(&self, snapshot: Snapshot) {
            *self.snapshot.lock().unwrap() = Some(snapshot);
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Pasteboard for FakePasteboard {
        fn change_count(&self) -> u64 {
            self.counter.load(Ordering::SeqCst)
        }

        fn read(&self) -> crate::errors::Result<Option<Snapshot>> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        fn write(&self, _items: &[Vec<Payload>]) -> crate::errors::Result<()> {
            Ok(())
        }
    }

    struct FailingStore;

    impl HistoryStore for FailingStore {
        fn upsert(&self, _: NewEntry) -> crate::errors::Result<i64> {
            Err(HistoryError::NotConnected)
        }
        fn insert(&self, _: NewEntry) -> crate::errors::Result<i64> {
            Err(HistoryError::NotConnected)
        }
        fn search(
            &self,
            _: &SearchFilter,
            _: i64,
            _: i64,
        ) -> crate::errors::Result<PagedResult> {
            Err(HistoryError::NotConnected)
        }
        fn select_full(&self, _: &[i64]) -> crate::errors::Result<Vec<HistoryEntry>> {
            Err(HistoryError::NotConnected)
        }
        fn exists(&self, _: &str) -> crate::errors::Result<bool> {
            Err(HistoryError::NotConnected)
        }
        fn toggle_favorite(&self, _: i64) -> crate::errors::Result<()> {
            Err(HistoryError::NotConnected)
        }
        fn toggle_pin(&self, _: i64) -> crate::errors::Result<()> {
            Err(HistoryError::NotConnected)
        }
        fn update_tags(&self, _: i64, _: &[String]) -> crate::errors::Result<()> {
            Err(HistoryError::NotConnected)
        }
        fn update_last_used(&self, _: &[i64]) -> crate::errors::Result<()> {
            Err(HistoryError::NotConnected)
        }
        fn delete(&self, _: i64) -> crate::errors::Result<()> {
            Err(HistoryError::NotConnected)
        }
        fn truncate(&self) -> crate::errors::Result<i64> {
            Err(HistoryError::NotConnected)
        }
        fn delete_older_than(&self, _: chrono::Duration) -> crate::errors::Result<i64> {
            Err(HistoryError::NotConnected)
        }
        fn delete_expired(
            &self,
            _: &[Category],
            _: DateTime<Utc>,
        ) -> crate::errors::Result<i64> {
            Err(HistoryError::NotConnected)
        }
        fn count_total(&self) -> crate::errors::Result<i64> {
            Err(HistoryError::NotConnected)
        }
        fn count_by_category(&self) -> crate::errors::Result<Vec<(String, i64)>> {
            Err(HistoryError::NotConnected)
        }
        fn compact(&self) -> crate::errors::Result<()> {
            Err(HistoryError::NotConnected)
        }
    }

    fn text_snapshot(source_app: &str, text: &str) -> Snapshot {
        Snapshot {
            source_app: source_app.to_string(),
            preview: text.to_string(),
            category: Category::Text,
            items: vec![SnapshotItem {
                payloads: vec![Payload {
                    kind: KIND_TEXT.to_string(),
                    bytes: text.as_bytes().to_vec(),
                }],
            }],
        }
    }

    fn accept_all_copy() -> Box<CopyFilter> {
        Box::new(|_| true)
    }

    fn accept_all_parsed() -> Box<ParsedFilter> {
        Box::new(|_| true)
    }

    #[test]
    fn test_tick_noop_without_change() {
        let pasteboard = FakePasteboard::new();
        let store = SqliteStore::in_memory().unwrap();
        let mut last = pasteboard.change_count();
        tick(&pasteboard, &store, &*accept_all_copy(), &*accept_all_parsed(), &mut last);
        assert_eq!(store.count_total().unwrap(), 0);
    }

    #[test]
    fn test_tick_persists_new_capture() {
        let pasteboard = FakePasteboard::new();
        let store = SqliteStore::in_memory().unwrap();
        let mut last = pasteboard.change_count();
        pasteboard.place(text_snapshot("Finder", "copied text"));

        tick(&pasteboard, &store, &*accept_all_copy(), &*accept_all_parsed(), &mut last);
        assert_eq!(store.count_total().unwrap(), 1);

        // Counter unchanged since: next tick is a no-op.
        tick(&pasteboard, &store, &*accept_all_copy(), &*accept_all_parsed(), &mut last);
        assert_eq!(store.count_total().unwrap(), 1);
    }

    #[test]
    fn test_tick_dedups_identical_content() {
        let pasteboard = FakePasteboard::new();
        let store = SqliteStore::in_memory().unwrap();
        let mut last = pasteboard.change_count();

        pasteboard.place(text_snapshot("Finder", "same text"));
        tick(&pasteboard, &store, &*accept_all_copy(), &*accept_all_parsed(), &mut last);

        // Same content copied again from a different app: one row, and the
        // stored source app stays the first capture's.
        pasteboard.place(text_snapshot("Terminal", "same text"));
        tick(&pasteboard, &store, &*accept_all_copy(), &*accept_all_parsed(), &mut last);

        assert_eq!(store.count_total().unwrap(), 1);
        let page = store.search(&SearchFilter::default(), 0, 10).unwrap();
        assert_eq!(page.items[0].source_app, "Finder");
    }

    #[test]
    fn test_tick_rejected_by_copy_filter() {
        let pasteboard = FakePasteboard::new();
        let store = SqliteStore::in_memory().unwrap();
        let mut last = pasteboard.change_count();
        pasteboard.place(text_snapshot("com.apple.keychainaccess", "secret"));

        let on_copy: Box<CopyFilter> = Box::new(|app| app != "com.apple.keychainaccess");
        tick(&pasteboard, &store, &*on_copy, &*accept_all_parsed(), &mut last);
        assert_eq!(store.count_total().unwrap(), 0);
    }

    #[test]
    fn test_tick_rejected_by_parsed_filter() {
        let pasteboard = FakePasteboard::new();
        let store = SqliteStore::in_memory().unwrap();
        let mut last = pasteboard.change_count();
        pasteboard.place(text_snapshot("Finder", "unwanted"));

        let on_parsed: Box<ParsedFilter> = Box::new(|s| !s.category.is_text());
        tick(&pasteboard, &store, &*accept_all_copy(), &*on_parsed, &mut last);
        assert_eq!(store.count_total().unwrap(), 0);
    }

    #[test]
    fn test_tick_swallows_store_errors() {
        let pasteboard = FakePasteboard::new();
        let store = FailingStore;
        let mut last = pasteboard.change_count();
        pasteboard.place(text_snapshot("Finder", "doomed"));

        tick(&pasteboard, &store, &*accept_all_copy(), &*accept_all_parsed(), &mut last);
        // Counter was consumed, so the failure is not retried forever.
        assert_eq!(last, pasteboard.change_count());
    }

    #[test]
    fn test_shutdown_without_listen_fails() {
        let pasteboard: Arc<dyn Pasteboard> = Arc::new(FakePasteboard::new());
        let store: Arc<dyn HistoryStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let mut watcher = ClipboardWatcher::new(pasteboard, store);
        assert!(matches!(watcher.shutdown(), Err(HistoryError::NotArmed)));
    }

    #[test]
    fn test_listen_shutdown_lifecycle() {
        let pasteboard: Arc<dyn Pasteboard> = Arc::new(FakePasteboard::new());
        let store: Arc<dyn HistoryStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let mut watcher = ClipboardWatcher::new(pasteboard, store)
            .with_interval(Duration::from_millis(5));

        watcher.listen().unwrap();
        assert!(watcher.is_armed());
        // Re-arming while armed replaces the worker.
        watcher.listen().unwrap();
        assert!(watcher.is_armed());

        watcher.shutdown().unwrap();
        assert!(!watcher.is_armed());
        assert!(matches!(watcher.shutdown(), Err(HistoryError::NotArmed)));
    }

    #[test]
    fn test_listen_captures_in_background() {
        let pasteboard = Arc::new(FakePasteboard::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut watcher = ClipboardWatcher::new(
            Arc::clone(&pasteboard) as Arc<dyn Pasteboard>,
            Arc::clone(&store) as Arc<dyn HistoryStore>,
        )
        .with_interval(Duration::from_millis(5));

        watcher.listen().unwrap();
        pasteboard.place(text_snapshot("Finder", "picked up by the loop"));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while store.count_total().unwrap() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        watcher.shutdown().unwrap();

        assert_eq!(store.count_total().unwrap(), 1);
    }
}
