pub mod config;
pub mod errors;
pub mod hash;
pub mod pasteboard;
pub mod retention;
pub mod storage;
pub mod watcher;

pub use errors::{HistoryError, Result};
