use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hlc::Hlc;
use crate::ids::{ActorId, EntityId, EntryId};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(CoreError::InvalidData(format!("unknown operation kind: {s}"))),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a logged operation did to its row. The variant fixes which snapshots
/// exist, so an Insert can never carry prior state and a Delete can never
/// carry new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Insert { new: Snapshot },
    Update { prior: Snapshot, new: Snapshot },
    Delete { prior: Snapshot },
}

impl Change {
    /// Assemble a change from the loose `(kind, prior?, new?)` form the
    /// record interface accepts.
    pub fn from_parts(
        kind: OperationKind,
        prior: Option<Snapshot>,
        new: Option<Snapshot>,
    ) -> Result<Self, CoreError> {
        let shape_err = |reason| CoreError::InvalidLogShape { kind, reason };
        match (kind, prior, new) {
            (OperationKind::Insert, None, Some(new)) => Ok(Change::Insert { new }),
            (OperationKind::Insert, Some(_), _) => {
                Err(shape_err("insert must not carry prior state"))
            }
            (OperationKind::Insert, None, None) => Err(shape_err("insert requires new state")),
            (OperationKind::Update, Some(prior), Some(new)) => Ok(Change::Update { prior, new }),
            (OperationKind::Update, _, _) => {
                Err(shape_err("update requires both prior and new state"))
            }
            (OperationKind::Delete, Some(prior), None) => Ok(Change::Delete { prior }),
            (OperationKind::Delete, _, Some(_)) => {
                Err(shape_err("delete must not carry new state"))
            }
            (OperationKind::Delete, None, None) => Err(shape_err("delete requires prior state")),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Change::Insert { .. } => OperationKind::Insert,
            Change::Update { .. } => OperationKind::Update,
            Change::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn prior(&self) -> Option<&Snapshot> {
        match self {
            Change::Insert { .. } => None,
            Change::Update { prior, .. } | Change::Delete { prior } => Some(prior),
        }
    }

    pub fn new_state(&self) -> Option<&Snapshot> {
        match self {
            Change::Insert { new } | Change::Update { new, .. } => Some(new),
            Change::Delete { .. } => None,
        }
    }

    /// Both snapshots must describe the entry's own entity type.
    pub fn check_entity_type(&self, entity_type: &str) -> Result<(), CoreError> {
        let kind = self.kind();
        for snap in self.prior().into_iter().chain(self.new_state()) {
            if snap.entity_type() != entity_type {
                return Err(CoreError::InvalidLogShape {
                    kind,
                    reason: "snapshot entity type differs from entry entity type",
                });
            }
        }
        Ok(())
    }
}

/// A log entry that has not been appended yet.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub actor: ActorId,
    pub entity_type: &'static str,
    pub entity_id: EntityId,
    pub change: Change,
    pub created_at: Hlc,
}

/// One row of history. Immutable apart from `rolled_back`, which only ever
/// moves from false to true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub actor: ActorId,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub change: Change,
    pub created_at: Hlc,
    pub rolled_back: bool,
}

impl LogEntry {
    pub fn kind(&self) -> OperationKind {
        self.change.kind()
    }

    pub fn prior_state(&self) -> Option<&Snapshot> {
        self.change.prior()
    }

    pub fn new_state(&self) -> Option<&Snapshot> {
        self.change.new_state()
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{}",
            self.id,
            self.kind(),
            self.entity_type,
            self.entity_id
        )
    }
}
