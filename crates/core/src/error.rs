use thiserror::Error;

use crate::entry::OperationKind;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("unknown field {field} on entity type {entity_type}")]
    UnknownField { entity_type: String, field: String },

    #[error("invalid log shape for {kind}: {reason}")]
    InvalidLogShape {
        kind: OperationKind,
        reason: &'static str,
    },
}
