pub mod models;
pub mod schema;
pub mod sqlite;

use chrono::{DateTime, Duration, Utc};

use crate::errors::Result;
use models::{Category, HistoryEntry, NewEntry, PagedResult, SearchFilter};

/// The persistence engine behind the capture loop, the retention scheduler
/// and the UI read path. Implementations serialize writes internally; a
/// multi-table insert is atomic.
pub trait HistoryStore: Send + Sync {
    /// Insert-or-touch keyed by identity hash: an existing row only gets its
    /// last-used and created timestamps refreshed, child rows and
    /// favorite/pin/tag state are left alone.
    fn upsert(&self, entry: NewEntry) -> Result<i64>;
    /// Unconditional insert of the full entry graph.
    fn insert(&self, entry: NewEntry) -> Result<i64>;
    fn search(&self, filter: &SearchFilter, page: i64, page_size: i64) -> Result<PagedResult>;
    /// Hydrate full graphs for the given ids, in input order; unknown ids
    /// are silently omitted.
    fn select_full(&self, ids: &[i64]) -> Result<Vec<HistoryEntry>>;
    fn exists(&self, hash: &str) -> Result<bool>;
    fn toggle_favorite(&self, id: i64) -> Result<()>;
    fn toggle_pin(&self, id: i64) -> Result<()>;
    fn update_tags(&self, id: i64, tags: &[String]) -> Result<()>;
    fn update_last_used(&self, ids: &[i64]) -> Result<()>;
    fn delete(&self, id: i64) -> Result<()>;
    /// Delete everything and reset autoincrement counters; returns the
    /// number of entries removed.
    fn truncate(&self) -> Result<i64>;
    /// Delete entries created before `now - max_age`, keeping favorited and
    /// pinned ones.
    fn delete_older_than(&self, max_age: Duration) -> Result<i64>;
    /// Category-scoped expiry with an absolute cutoff. Keeps favorited
    /// entries; the pinned flag is deliberately not re-checked here.
    fn delete_expired(&self, categories: &[Category], cutoff: DateTime<Utc>) -> Result<i64>;
    fn count_total(&self) -> Result<i64>;
    fn count_by_category(&self) -> Result<Vec<(String, i64)>>;
    /// Reclaim file space after bulk deletion.
    fn compact(&self) -> Result<()>;
}
