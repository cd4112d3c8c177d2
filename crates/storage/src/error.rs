use thiserror::Error;
use undolog_core::EntryId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("log entry {entry_id} is already rolled back")]
    AlreadyRolledBack { entry_id: EntryId },

    #[error("row collision: {entity_type}/{entity_id}")]
    RowCollision {
        entity_type: String,
        entity_id: String,
    },

    #[error("core error: {0}")]
    Core(#[from] undolog_core::CoreError),
}
