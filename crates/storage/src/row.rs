use rusqlite::types::{Value, ValueRef};
use undolog_core::{FieldKind, FieldValue};

use crate::error::StorageError;

/// Column value to write for a field.
pub fn to_sql(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Integer(n) | FieldValue::Timestamp(n) => Value::Integer(*n),
        FieldValue::Float(f) => Value::Real(*f),
        FieldValue::Boolean(b) => Value::Integer(i64::from(*b)),
        FieldValue::Bytes(b) => Value::Blob(b.clone()),
    }
}

/// Read a column back as the declared kind. SQLite only keeps storage
/// classes, so the declaration is what tells a boolean from an integer.
pub fn from_sql(
    kind: FieldKind,
    column: &str,
    value: ValueRef<'_>,
) -> Result<FieldValue, StorageError> {
    let mismatch = || {
        StorageError::Serialization(format!(
            "column {column} holds {:?}, declared {kind:?}",
            value.data_type()
        ))
    };
    let out = match (kind, value) {
        (_, ValueRef::Null) => FieldValue::Null,
        (FieldKind::Text, ValueRef::Text(t)) => FieldValue::Text(
            std::str::from_utf8(t)
                .map_err(|e| StorageError::Serialization(format!("column {column}: {e}")))?
                .to_string(),
        ),
        (FieldKind::Integer, ValueRef::Integer(n)) => FieldValue::Integer(n),
        (FieldKind::Timestamp, ValueRef::Integer(n)) => FieldValue::Timestamp(n),
        (FieldKind::Float, ValueRef::Real(f)) => FieldValue::Float(f),
        (FieldKind::Float, ValueRef::Integer(n)) => FieldValue::Float(n as f64),
        (FieldKind::Boolean, ValueRef::Integer(0)) => FieldValue::Boolean(false),
        (FieldKind::Boolean, ValueRef::Integer(1)) => FieldValue::Boolean(true),
        (FieldKind::Bytes, ValueRef::Blob(b)) => FieldValue::Bytes(b.to_vec()),
        _ => return Err(mismatch()),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_kind_restores_variant() {
        let stored = to_sql(&FieldValue::Boolean(true));
        assert_eq!(stored, Value::Integer(1));
        let back = from_sql(FieldKind::Boolean, "done", ValueRef::from(&stored)).unwrap();
        assert_eq!(back, FieldValue::Boolean(true));

        let stored = to_sql(&FieldValue::Timestamp(1_700_000_000));
        let back = from_sql(FieldKind::Timestamp, "due_at", ValueRef::from(&stored)).unwrap();
        assert_eq!(back, FieldValue::Timestamp(1_700_000_000));
    }

    #[test]
    fn null_reads_as_null_for_any_kind() {
        for kind in [FieldKind::Text, FieldKind::Integer, FieldKind::Bytes] {
            assert_eq!(from_sql(kind, "c", ValueRef::Null).unwrap(), FieldValue::Null);
        }
    }

    #[test]
    fn storage_class_mismatch_is_an_error() {
        assert!(from_sql(FieldKind::Integer, "position", ValueRef::Text(b"3")).is_err());
        assert!(from_sql(FieldKind::Boolean, "done", ValueRef::Integer(2)).is_err());
    }
}
