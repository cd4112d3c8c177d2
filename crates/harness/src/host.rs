use undolog_core::{ActorId, EntityId, FieldMap, FieldValue, LogEntry};
use undolog_engine::{Engine, EngineError, UndoReport};

use crate::schema::{Card, id_ref, kanban_guard};

/// Install `env_logger` once per test binary. Later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A host application in miniature: one engine and the actor it is currently
/// acting for. Every mutation goes through a unit of work, so rows and log
/// entries always commit together.
pub struct TestHost {
    pub engine: Engine,
    actor: ActorId,
}

impl TestHost {
    /// In-memory database with the kanban schema.
    pub fn new(actor: &str) -> Result<Self, EngineError> {
        let engine = Engine::open_in_memory(kanban_guard()?)?;
        Ok(Self::with_engine(engine, actor))
    }

    pub fn with_engine(engine: Engine, actor: &str) -> Self {
        init_logging();
        Self {
            engine,
            actor: ActorId::from(actor),
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Switch the acting principal, e.g. to simulate another user editing
    /// the same rows.
    pub fn act_as(&mut self, actor: &str) {
        self.actor = ActorId::from(actor);
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn insert(
        &mut self,
        entity_type: &str,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<EntityId, EngineError> {
        let id = EntityId::new();
        self.insert_with_id(entity_type, id, fields)?;
        Ok(id)
    }

    pub fn insert_with_id(
        &mut self,
        entity_type: &str,
        id: EntityId,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<LogEntry, EngineError> {
        let mut uow = self.engine.begin(&self.actor)?;
        let entry = uow.insert(entity_type, id, fields)?;
        uow.commit()?;
        Ok(entry)
    }

    pub fn update(
        &mut self,
        entity_type: &str,
        id: EntityId,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<LogEntry, EngineError> {
        let mut uow = self.engine.begin(&self.actor)?;
        let entry = uow.update(entity_type, id, fields)?;
        uow.commit()?;
        Ok(entry)
    }

    pub fn delete(&mut self, entity_type: &str, id: EntityId) -> Result<LogEntry, EngineError> {
        let mut uow = self.engine.begin(&self.actor)?;
        let entry = uow.delete(entity_type, id)?;
        uow.commit()?;
        Ok(entry)
    }

    pub fn create_board(&mut self, name: &str) -> Result<EntityId, EngineError> {
        self.insert(
            "board",
            vec![("name", name.into()), ("archived", false.into())],
        )
    }

    pub fn create_column(
        &mut self,
        board_id: EntityId,
        name: &str,
        position: i64,
    ) -> Result<EntityId, EngineError> {
        self.insert(
            "column",
            vec![
                ("board_id", id_ref(board_id)),
                ("name", name.into()),
                ("position", position.into()),
            ],
        )
    }

    pub fn create_card(&mut self, card: &Card) -> Result<LogEntry, EngineError> {
        let mut uow = self.engine.begin(&self.actor)?;
        let entry = uow.insert_entity(card)?;
        uow.commit()?;
        Ok(entry)
    }

    /// A board with one column, ready for cards.
    pub fn setup_board(&mut self) -> Result<EntityId, EngineError> {
        let board = self.create_board("Production")?;
        self.create_column(board, "Todo", 0)
    }

    // ========================================================================
    // Undo and queries
    // ========================================================================

    pub fn undo(&mut self, count: usize) -> Result<UndoReport, EngineError> {
        self.engine.undo(&self.actor, count)
    }

    pub fn history(&self, limit: usize) -> Result<Vec<LogEntry>, EngineError> {
        self.engine.history(&self.actor, limit)
    }

    pub fn undoable(&self) -> Result<u64, EngineError> {
        self.engine.undoable_count(&self.actor)
    }

    pub fn row(&self, entity_type: &str, id: EntityId) -> Result<Option<FieldMap>, EngineError> {
        self.engine.get_row(entity_type, id)
    }

    /// A single field of a row, or `None` when the row is gone.
    pub fn field(
        &self,
        entity_type: &str,
        id: EntityId,
        field: &str,
    ) -> Result<Option<FieldValue>, EngineError> {
        Ok(self
            .row(entity_type, id)?
            .and_then(|row| row.get(field).cloned()))
    }
}
