use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Insert failed: {0}")]
    InsertFailed(rusqlite::Error),

    #[error("Update failed: {0}")]
    UpdateFailed(rusqlite::Error),

    #[error("Delete failed: {0}")]
    DeleteFailed(rusqlite::Error),

    #[error("Query failed: {0}")]
    QueryFailed(rusqlite::Error),

    #[error("Store is not available")]
    NotConnected,

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Watcher is not armed")]
    NotArmed,
}

pub type Result<T> = std::result::Result<T, HistoryError>;
