use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Row, Transaction, params, params_from_iter};

use super::HistoryStore;
use super::models::{
    Category, EntryItem, HistoryEntry, ItemContent, NewEntry, PagedResult, SearchFilter,
};
use super::schema;
use crate::errors::{HistoryError, Result};

const ENTRY_COLUMNS: &str = "id, source_app, preview, hash, category, is_favorited, is_pinned,
           tags, last_used_at, created_at";

const DEFAULT_PAGE_SIZE: i64 = 30;

/// SQLite-backed history store. All access goes through one connection
/// behind a mutex, which is the single-writer discipline: writes are
/// serialized, and a multi-table graph insert commits in one transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<HistoryEntry> {
    let category: String = row.get(4)?;
    let favorited: i64 = row.get(5)?;
    let pinned: i64 = row.get(6)?;
    let tags_json: Option<String> = row.get(7)?;
    let tags = tags_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    Ok(HistoryEntry {
        id: row.get(0)?,
        source_app: row.get(1)?,
        preview: row.get(2)?,
        hash: row.get(3)?,
        category: Category::parse(&category).unwrap_or(Category::Other),
        favorited: favorited != 0,
        pinned: pinned != 0,
        tags,
        last_used_at: row.get(8)?,
        created_at: row.get(9)?,
        items: Vec::new(),
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Inserts the full entry graph (entry, items, contents) on an open
/// transaction. Caller commits.
fn insert_graph(tx: &Transaction, entry: &NewEntry, now: DateTime<Utc>) -> Result<i64> {
    if entry.items.is_empty() {
        return Err(HistoryError::InvalidData(
            "entry must contain at least one item".to_string(),
        ));
    }

    tx.execute(
        "INSERT INTO history (source_app, preview, hash, category, is_favorited, is_pinned, tags, last_used_at, created_at)
         VALUES (?, ?, ?, ?, 0, 0, NULL, ?, ?)",
        params![
            entry.source_app,
            entry.preview,
            entry.hash,
            entry.category.as_str(),
            now,
            now,
        ],
    )
    .map_err(HistoryError::InsertFailed)?;
    let entry_id = tx.last_insert_rowid();

    for (index, item) in entry.items.iter().enumerate() {
        tx.execute(
            "INSERT INTO history_item (history_id, item_index) VALUES (?, ?)",
            params![entry_id, index as i64],
        )
        .map_err(HistoryError::InsertFailed)?;
        let item_id = tx.last_insert_rowid();

        for content in &item.contents {
            tx.execute(
                "INSERT INTO history_content (item_id, kind, bytes, priority) VALUES (?, ?, ?, ?)",
                params![item_id, content.kind, content.bytes, content.priority],
            )
            .map_err(HistoryError::InsertFailed)?;
        }
    }

    Ok(entry_id)
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(HistoryError::QueryFailed)?;
        for stmt in [
            schema::CREATE_HISTORY_TABLE,
            schema::CREATE_ITEM_TABLE,
            schema::CREATE_CONTENT_TABLE,
            schema::CREATE_INDEX_CREATED_AT,
            schema::CREATE_INDEX_LAST_USED_AT,
            schema::CREATE_INDEX_CATEGORY,
            schema::CREATE_INDEX_SOURCE_APP,
            schema::CREATE_INDEX_ITEM_HISTORY_ID,
            schema::CREATE_INDEX_CONTENT_PRIORITY,
        ] {
            conn.execute(stmt, []).map_err(HistoryError::QueryFailed)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_| HistoryError::NotConnected)?;
        }
        let conn = Connection::open(path).map_err(|_| HistoryError::NotConnected)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(HistoryError::QueryFailed)?;
        Self::new(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|_| HistoryError::NotConnected)?;
        Self::new(conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| HistoryError::NotConnected)
    }

    #[cfg(test)]
    pub fn raw(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

impl HistoryStore for SqliteStore {
    fn upsert(&self, entry: NewEntry) -> Result<i64> {
        if entry.items.is_empty() {
            return Err(HistoryError::InvalidData(
                "entry must contain at least one item".to_string(),
            ));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(HistoryError::QueryFailed)?;
        let now = Utc::now();

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM history WHERE hash = ?",
                params![entry.hash],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(HistoryError::QueryFailed(other)),
            })?;

        let id = match existing {
            Some(id) => {
                // Repeated capture of known content: bump recency only.
                // Favorite/pin/tag state and child rows stay as they are.
                tx.execute(
                    "UPDATE history SET last_used_at = ?, created_at = ? WHERE id = ?",
                    params![now, now, id],
                )
                .map_err(HistoryError::UpdateFailed)?;
                id
            }
            None => insert_graph(&tx, &entry, now)?,
        };

        tx.commit().map_err(HistoryError::InsertFailed)?;
        Ok(id)
    }

    fn insert(&self, entry: NewEntry) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(HistoryError::QueryFailed)?;
        let id = insert_graph(&tx, &entry, Utc::now())?;
        tx.commit().map_err(HistoryError::InsertFailed)?;
        Ok(id)
    }

    fn search(&self, filter: &SearchFilter, page: i64, page_size: i64) -> Result<PagedResult> {
        let page = page.max(0);
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };

        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref keyword) = filter.keyword
            && !keyword.is_empty()
        {
            conditions.push("preview LIKE '%' || ? || '%'");
            values.push(Box::new(keyword.clone()));
        }
        if let Some(category) = filter.category {
            conditions.push("category = ?");
            values.push(Box::new(category.as_str().to_string()));
        }
        if let Some(favorited) = filter.favorited {
            conditions.push("is_favorited = ?");
            values.push(Box::new(favorited as i64));
        }
        if let Some(pinned) = filter.pinned {
            conditions.push("is_pinned = ?");
            values.push(Box::new(pinned as i64));
        }
        if let Some(ref source_app) = filter.source_app {
            conditions.push("source_app = ?");
            values.push(Box::new(source_app.clone()));
        }
        if let Some(from) = filter.created_from {
            conditions.push("created_at >= ?");
            values.push(Box::new(from));
        }
        if let Some(to) = filter.created_to {
            conditions.push("created_at <= ?");
            values.push(Box::new(to));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Fetch one row past the page to learn has_more without a count
        // query. DESC ordering puts NULL last_used_at after every real
        // timestamp, which is the required "never used sorts oldest" rule.
        let sql = format!(
            "SELECT {} FROM history {}
             ORDER BY last_used_at DESC, created_at DESC
             LIMIT ? OFFSET ?",
            ENTRY_COLUMNS, where_clause
        );
        values.push(Box::new(page_size + 1));
        values.push(Box::new(page * page_size));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(HistoryError::QueryFailed)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let mut items = stmt
            .query_map(param_refs.as_slice(), row_to_entry)
            .map_err(HistoryError::QueryFailed)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(HistoryError::QueryFailed)?;

        let has_more = items.len() as i64 > page_size;
        if has_more {
            items.truncate(page_size as usize);
        }

        Ok(PagedResult {
            items,
            has_more,
            page,
            page_size,
        })
    }

    fn select_full(&self, ids: &[i64]) -> Result<Vec<HistoryEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM history WHERE id IN ({})",
            ENTRY_COLUMNS,
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(HistoryError::QueryFailed)?;
        let entries = stmt
            .query_map(params_from_iter(ids.iter()), row_to_entry)
            .map_err(HistoryError::QueryFailed)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(HistoryError::QueryFailed)?;

        let mut item_stmt = conn
            .prepare(
                "SELECT id, history_id, item_index FROM history_item
                 WHERE history_id = ? ORDER BY item_index",
            )
            .map_err(HistoryError::QueryFailed)?;
        let mut content_stmt = conn
            .prepare(
                "SELECT id, item_id, kind, bytes, priority FROM history_content
                 WHERE item_id = ? ORDER BY priority",
            )
            .map_err(HistoryError::QueryFailed)?;

        let mut by_id: HashMap<i64, HistoryEntry> = HashMap::new();
        for mut entry in entries {
            let mut items = item_stmt
                .query_map(params![entry.id], |row| {
                    Ok(EntryItem {
                        id: row.get(0)?,
                        entry_id: row.get(1)?,
                        index: row.get(2)?,
                        contents: Vec::new(),
                    })
                })
                .map_err(HistoryError::QueryFailed)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(HistoryError::QueryFailed)?;

            for item in &mut items {
                item.contents = content_stmt
                    .query_map(params![item.id], |row| {
                        Ok(ItemContent {
                            id: row.get(0)?,
                            item_id: row.get(1)?,
                            kind: row.get(2)?,
                            bytes: row.get(3)?,
                            priority: row.get(4)?,
                        })
                    })
                    .map_err(HistoryError::QueryFailed)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(HistoryError::QueryFailed)?;
            }

            entry.items = items;
            by_id.insert(entry.id, entry);
        }

        // Preserve the caller's id order; ids that did not resolve are
        // simply absent.
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn exists(&self, hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM history WHERE hash = ?)",
            params![hash],
            |row| row.get(0),
        )
        .map_err(HistoryError::QueryFailed)
    }

    fn toggle_favorite(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changes = conn
            .execute(
                "UPDATE history SET is_favorited = 1 - is_favorited WHERE id = ?",
                params![id],
            )
            .map_err(HistoryError::UpdateFailed)?;
        if changes == 0 {
            return Err(HistoryError::RecordNotFound(format!(
                "history entry {} does not exist",
                id
            )));
        }
        Ok(())
    }

    fn toggle_pin(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changes = conn
            .execute(
                "UPDATE history SET is_pinned = 1 - is_pinned WHERE id = ?",
                params![id],
            )
            .map_err(HistoryError::UpdateFailed)?;
        if changes == 0 {
            return Err(HistoryError::RecordNotFound(format!(
                "history entry {} does not exist",
                id
            )));
        }
        Ok(())
    }

    fn update_tags(&self, id: i64, tags: &[String]) -> Result<()> {
        let json = serde_json::to_string(tags)
            .map_err(|e| HistoryError::InvalidData(e.to_string()))?;
        let conn = self.conn()?;
        let changes = conn
            .execute(
                "UPDATE history SET tags = ? WHERE id = ?",
                params![json, id],
            )
            .map_err(HistoryError::UpdateFailed)?;
        if changes == 0 {
            return Err(HistoryError::RecordNotFound(format!(
                "history entry {} does not exist",
                id
            )));
        }
        Ok(())
    }

    fn update_last_used(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Err(HistoryError::InvalidData(
                "no entry ids to update".to_string(),
            ));
        }
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE history SET last_used_at = ? WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(Utc::now())];
        for id in ids {
            values.push(Box::new(*id));
        }
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        conn.execute(&sql, param_refs.as_slice())
            .map_err(HistoryError::UpdateFailed)?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM history WHERE id = ?", params![id])
            .map_err(HistoryError::DeleteFailed)?;
        Ok(())
    }

    fn truncate(&self) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(HistoryError::QueryFailed)?;
        let deleted = tx
            .execute("DELETE FROM history", [])
            .map_err(HistoryError::DeleteFailed)?;
        for table in ["history", "history_item", "history_content"] {
            let _ = tx.execute(
                "DELETE FROM sqlite_sequence WHERE name = ?",
                params![table],
            );
        }
        tx.commit().map_err(HistoryError::DeleteFailed)?;
        Ok(deleted as i64)
    }

    fn delete_older_than(&self, max_age: Duration) -> Result<i64> {
        let cutoff = Utc::now() - max_age;
        let conn = self.conn()?;
        let changes = conn
            .execute(
                "DELETE FROM history
                 WHERE created_at < ? AND is_favorited = 0 AND is_pinned = 0",
                params![cutoff],
            )
            .map_err(HistoryError::DeleteFailed)?;
        Ok(changes as i64)
    }

    fn delete_expired(&self, categories: &[Category], cutoff: DateTime<Utc>) -> Result<i64> {
        if categories.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let sql = format!(
            "DELETE FROM history
             WHERE created_at < ? AND is_favorited = 0 AND category IN ({})",
            placeholders(categories.len())
        );
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(cutoff)];
        for category in categories {
            values.push(Box::new(category.as_str().to_string()));
        }
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        let changes = conn
            .execute(&sql, param_refs.as_slice())
            .map_err(HistoryError::DeleteFailed)?;
        Ok(changes as i64)
    }

    fn count_total(&self) -> Result<i64> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))
            .map_err(HistoryError::QueryFailed)
    }

    fn count_by_category(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT category, COUNT(*) FROM history GROUP BY category ORDER BY category",
            )
            .map_err(HistoryError::QueryFailed)?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(HistoryError::QueryFailed)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(HistoryError::QueryFailed)
    }

    fn compact(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("VACUUM").map_err(HistoryError::QueryFailed)
    }
}
