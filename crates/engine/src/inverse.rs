use undolog_core::{Change, CoreError, EntityDef, EntityId, FieldMap, LogEntry, SchemaGuard};
use undolog_storage::{RowStore, StorageError};

/// The operation that reverts one log entry.
#[derive(Debug, Clone)]
pub enum InverseOp {
    /// Undo an insert. The live row must still hold `expected`.
    DeleteRow {
        entity_id: EntityId,
        expected: FieldMap,
    },
    /// Undo an update. Only the captured fields are written back, and only
    /// while the live row still holds the values the update wrote.
    RestoreFields {
        entity_id: EntityId,
        expected: FieldMap,
        fields: FieldMap,
    },
    /// Undo a delete.
    ReinsertRow {
        entity_id: EntityId,
        fields: FieldMap,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The row the inverse has to touch is gone.
    RowMissing,
    /// The row the inverse has to re-create already exists.
    RowAlreadyPresent,
    /// A field the entry wrote has been changed since.
    RowChanged,
}

impl ConflictReason {
    pub fn describe(&self) -> &'static str {
        match self {
            ConflictReason::RowMissing => "target row no longer exists",
            ConflictReason::RowAlreadyPresent => "a row with this id exists again",
            ConflictReason::RowChanged => "a logged field was modified after this entry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Done,
    Conflict(ConflictReason),
}

impl InverseOp {
    pub fn entity_id(&self) -> EntityId {
        match self {
            InverseOp::DeleteRow { entity_id, .. }
            | InverseOp::RestoreFields { entity_id, .. }
            | InverseOp::ReinsertRow { entity_id, .. } => *entity_id,
        }
    }

    pub fn entity(&self) -> &'static EntityDef {
        match self {
            InverseOp::DeleteRow { expected, .. } => expected.entity,
            InverseOp::RestoreFields { fields, .. } | InverseOp::ReinsertRow { fields, .. } => {
                fields.entity
            }
        }
    }
}

/// Build the inverse of `entry`. Every identifier in the entry, including the
/// snapshot that is not replayed, has to pass the guard first.
pub fn build_inverse(guard: &SchemaGuard, entry: &LogEntry) -> Result<InverseOp, CoreError> {
    let entity = guard.entity(&entry.entity_type)?;
    entry.change.check_entity_type(entity.name)?;
    let entity_id = entry.entity_id;

    let op = match &entry.change {
        Change::Insert { new } => InverseOp::DeleteRow {
            entity_id,
            expected: new.decode(guard)?,
        },
        Change::Update { prior, new } => InverseOp::RestoreFields {
            entity_id,
            expected: new.decode(guard)?,
            fields: prior.decode(guard)?,
        },
        Change::Delete { prior } => InverseOp::ReinsertRow {
            entity_id,
            fields: prior.decode(guard)?,
        },
    };
    Ok(op)
}

/// Apply an inverse against `rows`. A row that is not where the log expects
/// it, or no longer holds what the entry wrote, comes back as
/// `Applied::Conflict`; the caller decides what to do with the surrounding
/// transaction.
pub fn apply<R: RowStore>(rows: &mut R, op: &InverseOp) -> Result<Applied, StorageError> {
    let outcome = match op {
        InverseOp::DeleteRow { entity_id, expected } => {
            if let Some(reason) = check_live(rows, *entity_id, expected)? {
                return Ok(Applied::Conflict(reason));
            }
            if rows.delete_row(expected.entity, *entity_id)? {
                Applied::Done
            } else {
                Applied::Conflict(ConflictReason::RowMissing)
            }
        }
        InverseOp::RestoreFields {
            entity_id,
            expected,
            fields,
        } => {
            if let Some(reason) = check_live(rows, *entity_id, expected)? {
                return Ok(Applied::Conflict(reason));
            }
            if rows.update_row(*entity_id, fields)? {
                Applied::Done
            } else {
                Applied::Conflict(ConflictReason::RowMissing)
            }
        }
        InverseOp::ReinsertRow { entity_id, fields } => match rows.insert_row(*entity_id, fields) {
            Ok(()) => Applied::Done,
            Err(StorageError::RowCollision { .. }) => {
                Applied::Conflict(ConflictReason::RowAlreadyPresent)
            }
            Err(e) => return Err(e),
        },
    };
    Ok(outcome)
}

/// Compare the live row against the state an entry left behind. Only the
/// fields in `expected` are looked at.
fn check_live<R: RowStore>(
    rows: &R,
    entity_id: EntityId,
    expected: &FieldMap,
) -> Result<Option<ConflictReason>, StorageError> {
    let Some(live) = rows.get_row(expected.entity, entity_id)? else {
        return Ok(Some(ConflictReason::RowMissing));
    };
    let changed = expected
        .values
        .iter()
        .any(|(def, value)| live.get(def.name) != Some(value));
    Ok(changed.then_some(ConflictReason::RowChanged))
}
