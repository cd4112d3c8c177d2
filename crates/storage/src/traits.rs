use rusqlite::Connection;
use undolog_core::{
    ActorId, EntityDef, EntityId, EntryId, FieldMap, Hlc, LogEntry, NewEntry, SchemaGuard,
};

use crate::error::StorageError;

/// Durable, append-only history of changes.
pub trait LogStore {
    fn append(&mut self, entry: &NewEntry) -> Result<EntryId, StorageError>;

    fn get_entry(&self, id: EntryId) -> Result<Option<LogEntry>, StorageError>;

    /// Full history for `actor`, most recent first, rolled-back entries included.
    fn list_by_actor(&self, actor: &ActorId, limit: usize) -> Result<Vec<LogEntry>, StorageError>;

    /// The `count` most recent entries for `actor` that are not rolled back,
    /// most recent first. Returns fewer when history runs out.
    fn select_undoable(&self, actor: &ActorId, count: usize) -> Result<Vec<LogEntry>, StorageError>;

    fn undoable_count(&self, actor: &ActorId) -> Result<u64, StorageError>;

    /// Flip `rolled_back` from false to true. Fails with `AlreadyRolledBack`
    /// when someone else got there first.
    fn mark_rolled_back(&mut self, id: EntryId) -> Result<(), StorageError>;

    /// Newest `created_at` recorded for `actor`, rolled back or not.
    fn latest_timestamp(&self, actor: &ActorId) -> Result<Option<Hlc>, StorageError>;
}

/// Access to the host rows the log describes. Every table and column name is
/// resolved through the schema guard before it is used.
pub trait RowStore {
    fn get_row(&self, def: &EntityDef, id: EntityId) -> Result<Option<FieldMap>, StorageError>;

    /// Fails with `RowCollision` when a row with `id` already exists.
    fn insert_row(&mut self, id: EntityId, fields: &FieldMap) -> Result<(), StorageError>;

    /// Writes only the given fields. Returns false when there is no such row.
    fn update_row(&mut self, id: EntityId, fields: &FieldMap) -> Result<bool, StorageError>;

    /// Returns false when there is no such row.
    fn delete_row(&mut self, def: &EntityDef, id: EntityId) -> Result<bool, StorageError>;
}

/// Anything holding a SQLite connection and the guard its tables were built
/// from. Both stores are implemented once on top of this, so the same calls
/// work on a bare connection and inside an open transaction.
pub trait Connected {
    fn conn(&self) -> &Connection;

    fn guard(&self) -> &SchemaGuard;
}
