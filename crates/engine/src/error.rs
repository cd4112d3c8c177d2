use thiserror::Error;
use undolog_core::{CoreError, EntityId, EntryId, LogEntry, OperationKind};
use undolog_storage::StorageError;

use crate::undo::UndoConflict;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("undo count {requested} is outside 1..={max}")]
    InvalidCount { requested: usize, max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("row not found: {entity_type}/{entity_id}")]
    RowNotFound {
        entity_type: String,
        entity_id: EntityId,
    },

    #[error(transparent)]
    Conflict(#[from] UndoConflict),

    #[error("cannot undo {entry_id} ({kind} {entity_type}/{entity_id}): {source}")]
    Integrity {
        entry_id: EntryId,
        kind: OperationKind,
        entity_type: String,
        entity_id: EntityId,
        /// Entries this call had already rolled back before it stopped.
        undone: Vec<LogEntry>,
        source: CoreError,
    },
}
