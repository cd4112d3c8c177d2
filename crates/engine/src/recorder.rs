use log::debug;
use undolog_core::{
    ActorId, Change, CoreError, Entity, EntityId, FieldMap, FieldValue, HlcClock, LogEntry,
    NewEntry, OperationKind, Snapshot,
};
use undolog_storage::{Connected, LogStore, RowStore, StorageTx};

use crate::error::EngineError;

/// Appends log entries inside a transaction someone else owns. It has no
/// commit of its own: the entry becomes durable exactly when the surrounding
/// unit of work commits.
pub struct ChangeRecorder<'r, 'e> {
    tx: &'r mut StorageTx<'e>,
    clock: &'r mut HlcClock,
    actor: &'r ActorId,
}

impl<'r, 'e> ChangeRecorder<'r, 'e> {
    pub(crate) fn new(
        tx: &'r mut StorageTx<'e>,
        clock: &'r mut HlcClock,
        actor: &'r ActorId,
    ) -> Self {
        Self { tx, clock, actor }
    }

    pub fn actor(&self) -> &ActorId {
        self.actor
    }

    /// Log one mutation. The entity type must be whitelisted, the snapshots
    /// must match the operation kind, and every snapshot field must be
    /// declared for that entity type.
    pub fn record(
        &mut self,
        kind: OperationKind,
        entity_type: &str,
        entity_id: EntityId,
        prior: Option<Snapshot>,
        new: Option<Snapshot>,
    ) -> Result<LogEntry, EngineError> {
        let guard = self.tx.guard();
        let entity = guard.entity(entity_type)?;
        let change = Change::from_parts(kind, prior, new)?;
        change.check_entity_type(entity.name)?;
        for snap in change.prior().into_iter().chain(change.new_state()) {
            snap.decode(guard)?;
        }

        // Another connection may have logged for this actor since our clock
        // last ticked.
        if let Some(latest) = self.tx.latest_timestamp(self.actor)? {
            self.clock.observe(latest);
        }
        let entry = NewEntry {
            actor: self.actor.clone(),
            entity_type: entity.name,
            entity_id,
            change,
            created_at: self.clock.tick()?,
        };
        let id = self.tx.append(&entry)?;
        Ok(LogEntry {
            id,
            actor: entry.actor,
            entity_type: entry.entity_type.to_string(),
            entity_id: entry.entity_id,
            change: entry.change,
            created_at: entry.created_at,
            rolled_back: false,
        })
    }
}

/// One transaction on behalf of one actor. Mutations made through it are
/// logged in the same transaction, so a row change and its log entry commit
/// or vanish together. Dropping it without `commit` rolls both back.
pub struct UnitOfWork<'e> {
    tx: StorageTx<'e>,
    clock: &'e mut HlcClock,
    actor: ActorId,
}

impl<'e> UnitOfWork<'e> {
    pub(crate) fn new(tx: StorageTx<'e>, clock: &'e mut HlcClock, actor: ActorId) -> Self {
        Self { tx, clock, actor }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Recorder handle bound to this unit's transaction, for hosts that apply
    /// mutations themselves.
    pub fn recorder(&mut self) -> ChangeRecorder<'_, 'e> {
        ChangeRecorder::new(&mut self.tx, self.clock, &self.actor)
    }

    /// Raw access to the transaction for host-side reads and writes that
    /// should share it.
    pub fn tx(&mut self) -> &mut StorageTx<'e> {
        &mut self.tx
    }

    pub fn get(&self, entity_type: &str, id: EntityId) -> Result<Option<FieldMap>, EngineError> {
        let entity = self.tx.guard().entity(entity_type)?;
        Ok(self.tx.get_row(entity, id)?)
    }

    /// Insert a row and log it. The new-state snapshot is the row as stored,
    /// including fields left NULL.
    pub fn insert<K, I>(
        &mut self,
        entity_type: &str,
        id: EntityId,
        fields: I,
    ) -> Result<LogEntry, EngineError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        let values = self.checked_fields(entity_type, fields)?;
        self.tx.insert_row(id, &values)?;
        let stored = self.require_row(entity_type, id)?;
        self.recorder().record(
            OperationKind::Insert,
            entity_type,
            id,
            None,
            Some(stored.to_snapshot()),
        )
    }

    pub fn insert_entity<E: Entity>(&mut self, entity: &E) -> Result<LogEntry, EngineError> {
        self.insert(E::ENTITY_TYPE, entity.id(), entity.fields())
    }

    /// Change the given fields of an existing row and log it. Prior and new
    /// snapshots cover only the fields this call touches, so undoing it leaves
    /// every other field alone.
    pub fn update<K, I>(
        &mut self,
        entity_type: &str,
        id: EntityId,
        fields: I,
    ) -> Result<LogEntry, EngineError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        let values = self.checked_fields(entity_type, fields)?;
        let touched: Vec<&str> = values.values.iter().map(|(def, _)| def.name).collect();
        let before = self.require_row(entity_type, id)?.restrict_to(&touched);
        self.tx.update_row(id, &values)?;
        let after = self.require_row(entity_type, id)?.restrict_to(&touched);
        self.recorder().record(
            OperationKind::Update,
            entity_type,
            id,
            Some(before.to_snapshot()),
            Some(after.to_snapshot()),
        )
    }

    /// Delete a row and log its full prior state.
    pub fn delete(&mut self, entity_type: &str, id: EntityId) -> Result<LogEntry, EngineError> {
        let before = self.require_row(entity_type, id)?;
        self.tx.delete_row(before.entity, id)?;
        self.recorder().record(
            OperationKind::Delete,
            entity_type,
            id,
            Some(before.to_snapshot()),
            None,
        )
    }

    pub fn commit(self) -> Result<(), EngineError> {
        self.tx.commit()?;
        debug!("committed unit of work for {}", self.actor);
        Ok(())
    }

    /// Unlike `Snapshot::encode`, a mutation naming an undeclared field is an
    /// error rather than something to drop quietly.
    fn checked_fields<K, I>(&self, entity_type: &str, fields: I) -> Result<FieldMap, EngineError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        let guard = self.tx.guard();
        let entity = guard.entity(entity_type)?;
        let mut collected = Vec::new();
        for (name, value) in fields {
            let def = guard.field(entity.name, name.as_ref())?;
            // SQLite stores NaN as NULL, so it could never be restored.
            if matches!(value, FieldValue::Float(f) if !f.is_finite()) {
                return Err(CoreError::InvalidData(format!(
                    "{}.{} must be a finite float, got {value:?}",
                    entity.name, def.name
                ))
                .into());
            }
            collected.push((name, value));
        }
        Ok(Snapshot::encode(entity, collected).decode(guard)?)
    }

    fn require_row(&self, entity_type: &str, id: EntityId) -> Result<FieldMap, EngineError> {
        self.get(entity_type, id)?.ok_or_else(|| EngineError::RowNotFound {
            entity_type: entity_type.to_string(),
            entity_id: id,
        })
    }
}
