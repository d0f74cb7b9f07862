pub const CREATE_HISTORY_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_app TEXT NOT NULL,
        preview TEXT NOT NULL,
        hash TEXT NOT NULL UNIQUE,
        category TEXT NOT NULL,
        is_favorited INTEGER NOT NULL DEFAULT 0,
        is_pinned INTEGER NOT NULL DEFAULT 0,
        tags TEXT,
        last_used_at TEXT,
        created_at TEXT NOT NULL
    )
";

pub const CREATE_ITEM_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS history_item (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        history_id INTEGER NOT NULL,
        item_index INTEGER NOT NULL,
        FOREIGN KEY (history_id) REFERENCES history(id) ON DELETE CASCADE
    )
";

pub const CREATE_CONTENT_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS history_content (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        bytes BLOB NOT NULL,
        priority INTEGER NOT NULL,
        FOREIGN KEY (item_id) REFERENCES history_item(id) ON DELETE CASCADE,
        UNIQUE(item_id, kind)
    )
";

pub const CREATE_INDEX_CREATED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_created_at ON history(created_at)";

pub const CREATE_INDEX_LAST_USED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_last_used_at ON history(last_used_at)";

pub const CREATE_INDEX_CATEGORY: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_category ON history(category)";

pub const CREATE_INDEX_SOURCE_APP: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_source_app ON history(source_app)";

pub const CREATE_INDEX_ITEM_HISTORY_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_item_history_id ON history_item(history_id)";

pub const CREATE_INDEX_CONTENT_PRIORITY: &str =
    "CREATE INDEX IF NOT EXISTS idx_content_priority ON history_content(item_id, priority)";
