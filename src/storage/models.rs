use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Text,
    Image,
    File,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Text => "text",
            Category::Image => "image",
            Category::File => "file",
            Category::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "text" => Some(Category::Text),
            "image" => Some(Category::Image),
            "file" => Some(Category::File),
            "other" => Some(Category::Other),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Category::Text)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Category::Image)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Category::File)
    }
}

/// One deduplicated clipboard history record. `items` is only populated by
/// `select_full`; list/search queries return it empty.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub source_app: String,
    pub preview: String,
    pub hash: String,
    pub category: Category,
    pub favorited: bool,
    pub pinned: bool,
    pub tags: Vec<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<EntryItem>,
}

/// One discrete clipboard object within a capture (one file of a multi-file
/// copy, one rich-text selection, ...).
#[derive(Debug, Clone, Serialize)]
pub struct EntryItem {
    pub id: i64,
    pub entry_id: i64,
    pub index: i64,
    pub contents: Vec<ItemContent>,
}

/// One typed byte representation of an item. Lower priority is preferred
/// for preview/paste.
#[derive(Debug, Clone, Serialize)]
pub struct ItemContent {
    pub id: i64,
    pub item_id: i64,
    pub kind: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub source_app: String,
    pub preview: String,
    pub hash: String,
    pub category: Category,
    pub items: Vec<NewItem>,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub contents: Vec<NewContent>,
}

#[derive(Debug, Clone)]
pub struct NewContent {
    pub kind: String,
    pub bytes: Vec<u8>,
    pub priority: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub keyword: Option<String>,
    pub category: Option<Category>,
    pub favorited: Option<bool>,
    pub pinned: Option<bool>,
    pub source_app: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PagedResult {
    pub items: Vec<HistoryEntry>,
    pub has_more: bool,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Serialize)]
pub struct StorageStats {
    pub total: i64,
    pub by_category: Vec<(String, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip() {
        for cat in [Category::Text, Category::Image, Category::File, Category::Other] {
            assert_eq!(Category::parse(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn test_category_parse_unknown() {
        assert_eq!(Category::parse("video"), None);
    }

    #[test]
    fn test_category_predicates() {
        assert!(Category::Text.is_text());
        assert!(Category::Image.is_image());
        assert!(Category::File.is_file());
        assert!(!Category::Other.is_text());
    }
}
