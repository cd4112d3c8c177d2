//! A small kanban schema: boards hold columns, columns hold cards.

use std::sync::Arc;

use undolog_core::{
    CoreError, Entity, EntityDef, EntityId, FieldDef, FieldKind, FieldValue, SchemaGuard,
};

const BOARD_FIELDS: &[FieldDef] = &[
    FieldDef { name: "name", kind: FieldKind::Text },
    FieldDef { name: "archived", kind: FieldKind::Boolean },
];

const COLUMN_FIELDS: &[FieldDef] = &[
    FieldDef { name: "board_id", kind: FieldKind::Bytes },
    FieldDef { name: "name", kind: FieldKind::Text },
    FieldDef { name: "position", kind: FieldKind::Integer },
];

const CARD_FIELDS: &[FieldDef] = &[
    FieldDef { name: "column_id", kind: FieldKind::Bytes },
    FieldDef { name: "title", kind: FieldKind::Text },
    FieldDef { name: "body", kind: FieldKind::Text },
    FieldDef { name: "position", kind: FieldKind::Integer },
    FieldDef { name: "done", kind: FieldKind::Boolean },
    FieldDef { name: "estimate", kind: FieldKind::Float },
    FieldDef { name: "due_at", kind: FieldKind::Timestamp },
];

pub static KANBAN: &[EntityDef] = &[
    EntityDef { name: "board", fields: BOARD_FIELDS },
    EntityDef { name: "column", fields: COLUMN_FIELDS },
    EntityDef { name: "card", fields: CARD_FIELDS },
];

pub fn kanban_guard() -> Result<Arc<SchemaGuard>, CoreError> {
    Ok(Arc::new(SchemaGuard::new(KANBAN)?))
}

/// Reference to another row, stored as its 16 id bytes.
pub fn id_ref(id: EntityId) -> FieldValue {
    FieldValue::Bytes(id.as_bytes().to_vec())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: EntityId,
    pub column_id: EntityId,
    pub title: String,
    pub body: Option<String>,
    pub position: i64,
    pub done: bool,
    pub estimate: Option<f64>,
    pub due_at: Option<i64>,
}

impl Card {
    pub fn new(column_id: EntityId, title: &str, position: i64) -> Self {
        Self {
            id: EntityId::new(),
            column_id,
            title: title.to_string(),
            body: None,
            position,
            done: false,
            estimate: None,
            due_at: None,
        }
    }
}

impl Entity for Card {
    const ENTITY_TYPE: &'static str = "card";

    fn id(&self) -> EntityId {
        self.id
    }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("column_id", id_ref(self.column_id)),
            ("title", self.title.as_str().into()),
            ("body", self.body.clone().into()),
            ("position", self.position.into()),
            ("done", self.done.into()),
            ("estimate", self.estimate.into()),
            ("due_at", self.due_at.map_or(FieldValue::Null, FieldValue::Timestamp)),
        ]
    }
}
