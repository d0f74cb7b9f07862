use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::storage::HistoryStore;
use crate::storage::models::Category;

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(8 * 60 * 60);
pub const STARTUP_DELAY: Duration = Duration::from_secs(5);

/// One expiry rule: entries of these categories created before `cutoff` are
/// eligible for deletion. Rules are plain values, rebuilt from preferences
/// on every pass.
#[derive(Debug, Clone)]
pub struct RetentionRule {
    pub categories: Vec<Category>,
    pub cutoff: DateTime<Utc>,
}

impl RetentionRule {
    pub fn new(categories: Vec<Category>, cutoff: DateTime<Utc>) -> Self {
        Self { categories, cutoff }
    }

    pub fn older_than(categories: Vec<Category>, max_age: chrono::Duration) -> Self {
        Self {
            categories,
            cutoff: Utc::now() - max_age,
        }
    }
}

/// Fetched lazily on each pass so preference changes apply on the next run
/// without restarting the scheduler.
pub type RulesGetter = dyn Fn() -> Vec<RetentionRule> + Send + Sync;

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Applies retention rules against the store on a long repeating interval,
/// plus one pass shortly after start to catch entries that expired while
/// the process was not running.
pub struct RetentionScheduler {
    store: Arc<dyn HistoryStore>,
    rules: Arc<RulesGetter>,
    interval: Duration,
    startup_delay: Duration,
    worker: Option<Worker>,
}

impl RetentionScheduler {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        rules: impl Fn() -> Vec<RetentionRule> + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
            interval: CLEANUP_INTERVAL,
            startup_delay: STARTUP_DELAY,
            worker: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Arms the background worker. Calling start on a running scheduler is
    /// a no-op.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }

        let (stop, ticks) = mpsc::channel();
        let store = Arc::clone(&self.store);
        let rules = Arc::clone(&self.rules);
        let startup_delay = self.startup_delay;
        let interval = self.interval;

        let handle = thread::spawn(move || {
            if stop_requested(&ticks, startup_delay) {
                return;
            }
            run_pass(store.as_ref(), &rules());
            loop {
                if stop_requested(&ticks, interval) {
                    return;
                }
                run_pass(store.as_ref(), &rules());
            }
        });

        self.worker = Some(Worker { stop, handle });
    }

    /// Stops the worker. Safe to call repeatedly; an in-flight pass is
    /// allowed to finish.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
        }
    }

    /// Runs one cleanup pass on a detached thread, with explicit rules or
    /// via the getter.
    pub fn trigger_now(&self, rules: Option<Vec<RetentionRule>>) {
        let store = Arc::clone(&self.store);
        let getter = Arc::clone(&self.rules);
        thread::spawn(move || {
            let rules = rules.unwrap_or_else(|| getter());
            run_pass(store.as_ref(), &rules);
        });
    }

    /// Synchronous single pass, for callers that want to wait for the
    /// result (e.g. an explicit cleanup command).
    pub fn run_once(&self, rules: Option<Vec<RetentionRule>>) {
        let rules = rules.unwrap_or_else(|| (self.rules)());
        run_pass(self.store.as_ref(), &rules);
    }
}

impl Drop for RetentionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_requested(ticks: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(ticks.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

/// A failed rule is logged and skipped; missed work is simply retried on
/// the next cycle.
fn run_pass(store: &dyn HistoryStore, rules: &[RetentionRule]) {
    for rule in rules {
        match store.delete_expired(&rule.categories, rule.cutoff) {
            Ok(0) => {}
            Ok(deleted) => {
                info!(deleted, cutoff = %rule.cutoff, "expired history entries removed");
            }
            Err(e) => warn!("retention rule failed: {e}"),
        }
    }
    if let Err(e) = store.compact() {
        warn!("storage compaction failed: {e}");
    }
}
