use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use thiserror::Error;
use undolog_core::{ActorId, EntityId, EntryId, LogEntry, OperationKind};
use undolog_storage::{Connected, LogStore, SqliteStorage, StorageError};

use crate::config::UndoPolicy;
use crate::error::EngineError;
use crate::inverse::{Applied, ConflictReason, apply, build_inverse};

/// The entry an undo run stopped at because the data moved on since it was
/// logged. The entry is left undoable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("undo of {entry_id} ({kind} {entity_type}/{entity_id}) conflicts: {}", .reason.describe())]
pub struct UndoConflict {
    pub entry_id: EntryId,
    pub kind: OperationKind,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub reason: ConflictReason,
}

/// Outcome of one undo call.
#[derive(Debug, Clone, Default)]
pub struct UndoReport {
    /// Entries rolled back by this call, newest first.
    pub undone: Vec<LogEntry>,
    /// Set when the run halted on a conflict.
    pub conflict: Option<UndoConflict>,
}

impl UndoReport {
    pub fn undone_ids(&self) -> Vec<EntryId> {
        self.undone.iter().map(|e| e.id).collect()
    }

    /// Treat a halting conflict as an error. The entries undone before it
    /// stay undone either way.
    pub fn into_result(self) -> Result<Vec<LogEntry>, EngineError> {
        match self.conflict {
            Some(conflict) => Err(EngineError::Conflict(conflict)),
            None => Ok(self.undone),
        }
    }
}

/// Reverts an actor's most recent entries, newest first. Each entry gets its
/// own IMMEDIATE transaction: claim, build the inverse, apply, commit. Nothing
/// from a failed entry survives, and everything before it stays committed.
pub(crate) struct UndoExecutor<'s> {
    storage: &'s mut SqliteStorage,
    policy: &'s UndoPolicy,
}

impl<'s> UndoExecutor<'s> {
    pub(crate) fn new(storage: &'s mut SqliteStorage, policy: &'s UndoPolicy) -> Self {
        Self { storage, policy }
    }

    pub(crate) fn run(
        &mut self,
        actor: &ActorId,
        count: usize,
        cancel: &AtomicBool,
    ) -> Result<UndoReport, EngineError> {
        let count = self.policy.resolve_count(count)?;
        let candidates = self.storage.select_undoable(actor, count)?;
        debug!(
            "undo for {actor}: {} of {count} requested entries available",
            candidates.len()
        );

        let mut report = UndoReport::default();
        for mut entry in candidates {
            if cancel.load(Ordering::Acquire) {
                info!("undo for {actor} cancelled after {} entries", report.undone.len());
                break;
            }

            let mut tx = self.storage.transaction()?;
            match tx.mark_rolled_back(entry.id) {
                Ok(()) => {}
                Err(StorageError::AlreadyRolledBack { entry_id }) => {
                    // Someone else undid it between our select and our claim.
                    warn!("{entry_id} was already rolled back, skipping");
                    tx.rollback()?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let op = match build_inverse(tx.guard(), &entry) {
                Ok(op) => op,
                Err(source) => {
                    tx.rollback()?;
                    warn!("refusing to undo {}: {source}", entry.id);
                    return Err(EngineError::Integrity {
                        entry_id: entry.id,
                        kind: entry.kind(),
                        entity_type: entry.entity_type,
                        entity_id: entry.entity_id,
                        undone: report.undone,
                        source,
                    });
                }
            };

            match apply(&mut tx, &op)? {
                Applied::Done => {
                    tx.commit()?;
                    entry.rolled_back = true;
                    info!("rolled back {entry}");
                    report.undone.push(entry);
                }
                Applied::Conflict(reason) => {
                    tx.rollback()?;
                    warn!("undo of {} halted: {}", entry.id, reason.describe());
                    report.conflict = Some(UndoConflict {
                        entry_id: entry.id,
                        kind: entry.kind(),
                        entity_type: entry.entity_type,
                        entity_id: entry.entity_id,
                        reason,
                    });
                    break;
                }
            }
        }
        Ok(report)
    }
}
