pub mod config;
pub mod error;
pub mod inverse;
pub mod recorder;
pub mod undo;

pub use config::{MAX_UNDO_COUNT, OversizedCount, UndoPolicy};
pub use error::EngineError;
pub use inverse::{Applied, ConflictReason, InverseOp, apply, build_inverse};
pub use recorder::{ChangeRecorder, UnitOfWork};
pub use undo::{UndoConflict, UndoReport};

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use undolog_core::{
    ActorId, EntityId, EntryId, FieldMap, HlcClock, LogEntry, OperationKind, SchemaGuard,
    Snapshot,
};
use undolog_storage::{Connected, LogStore, RowStore, SqliteStorage};

use crate::undo::UndoExecutor;

/// Change log and undo over one SQLite connection.
///
/// Several engines may share a database file; each entry's undo runs in its
/// own write transaction and claims the entry before touching any row.
pub struct Engine {
    storage: SqliteStorage,
    clock: HlcClock,
    policy: UndoPolicy,
}

impl Engine {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            storage,
            clock: HlcClock::new(),
            policy: UndoPolicy::default(),
        }
    }

    /// Fails with `InvalidConfig` when `policy` would allow more than
    /// `MAX_UNDO_COUNT` entries per call.
    pub fn with_policy(storage: SqliteStorage, policy: UndoPolicy) -> Result<Self, EngineError> {
        policy.validate()?;
        Ok(Self {
            policy,
            ..Self::new(storage)
        })
    }

    pub fn open(
        path: impl AsRef<Path>,
        guard: Arc<SchemaGuard>,
        policy: UndoPolicy,
    ) -> Result<Self, EngineError> {
        policy.validate()?;
        let storage = SqliteStorage::open(path, guard)?;
        Self::with_policy(storage, policy)
    }

    pub fn open_in_memory(guard: Arc<SchemaGuard>) -> Result<Self, EngineError> {
        Ok(Self::new(SqliteStorage::open_in_memory(guard)?))
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub fn schema(&self) -> &Arc<SchemaGuard> {
        self.storage.schema()
    }

    pub fn policy(&self) -> &UndoPolicy {
        &self.policy
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Open a unit of work for `actor`. Mutations and their log entries made
    /// through it become durable together on `commit`.
    pub fn begin(&mut self, actor: &ActorId) -> Result<UnitOfWork<'_>, EngineError> {
        let tx = self.storage.transaction()?;
        Ok(UnitOfWork::new(tx, &mut self.clock, actor.clone()))
    }

    /// Record a mutation the host has already made durable elsewhere, in a
    /// transaction of its own.
    pub fn record(
        &mut self,
        actor: &ActorId,
        kind: OperationKind,
        entity_type: &str,
        entity_id: EntityId,
        prior: Option<Snapshot>,
        new: Option<Snapshot>,
    ) -> Result<LogEntry, EngineError> {
        let mut uow = self.begin(actor)?;
        let entry = uow
            .recorder()
            .record(kind, entity_type, entity_id, prior, new)?;
        uow.commit()?;
        Ok(entry)
    }

    // ========================================================================
    // Undo
    // ========================================================================

    /// Undo the `count` most recent undoable entries of `actor`, newest first.
    /// Stops at the first conflict; see [`UndoReport`].
    pub fn undo(&mut self, actor: &ActorId, count: usize) -> Result<UndoReport, EngineError> {
        self.undo_with_cancel(actor, count, &AtomicBool::new(false))
    }

    /// Like [`Engine::undo`], but checks `cancel` before each entry. An entry
    /// already started is always finished or rolled back as a whole.
    pub fn undo_with_cancel(
        &mut self,
        actor: &ActorId,
        count: usize,
        cancel: &AtomicBool,
    ) -> Result<UndoReport, EngineError> {
        UndoExecutor::new(&mut self.storage, &self.policy).run(actor, count, cancel)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Full history of `actor`, newest first, rolled-back entries included.
    pub fn history(&self, actor: &ActorId, limit: usize) -> Result<Vec<LogEntry>, EngineError> {
        Ok(self.storage.list_by_actor(actor, limit)?)
    }

    pub fn get_entry(&self, id: EntryId) -> Result<Option<LogEntry>, EngineError> {
        Ok(self.storage.get_entry(id)?)
    }

    pub fn undoable_count(&self, actor: &ActorId) -> Result<u64, EngineError> {
        Ok(self.storage.undoable_count(actor)?)
    }

    pub fn get_row(
        &self,
        entity_type: &str,
        id: EntityId,
    ) -> Result<Option<FieldMap>, EngineError> {
        let entity = self.storage.guard().entity(entity_type)?;
        Ok(self.storage.get_row(entity, id)?)
    }
}
