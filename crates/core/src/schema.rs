//! The identifier whitelist.
//!
//! Every table and column name that ends up inside a dynamically built
//! statement is looked up here first, and the `&'static str` stored in the
//! definition is what gets used, never the caller's or the log's copy of the
//! name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Name of the identity column every guarded table carries. It is not a
/// snapshot field.
pub const ID_COLUMN: &str = "id";

/// Table names owned by the log store itself.
pub const RESERVED_TABLES: &[&str] = &["change_log", "schema_version"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Bytes,
}

impl FieldKind {
    /// SQLite column affinity used when creating the backing table.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Integer | FieldKind::Boolean | FieldKind::Timestamp => "INTEGER",
            FieldKind::Float => "REAL",
            FieldKind::Bytes => "BLOB",
        }
    }
}

#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug)]
pub struct EntityDef {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
}

impl EntityDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn require_field(&self, name: &str) -> Result<&FieldDef, CoreError> {
        self.field(name).ok_or_else(|| CoreError::UnknownField {
            entity_type: self.name.to_string(),
            field: name.to_string(),
        })
    }
}

/// The whitelist of `(entity type -> allowed fields)`, built once from static
/// definitions.
#[derive(Debug)]
pub struct SchemaGuard {
    entities: BTreeMap<&'static str, &'static EntityDef>,
}

impl SchemaGuard {
    pub fn new(defs: &'static [EntityDef]) -> Result<Self, CoreError> {
        let mut entities = BTreeMap::new();
        for def in defs {
            check_ident(def.name)?;
            if RESERVED_TABLES.contains(&def.name) {
                return Err(CoreError::InvalidSchema(format!(
                    "entity type name is reserved: {}",
                    def.name
                )));
            }
            if entities.insert(def.name, def).is_some() {
                return Err(CoreError::InvalidSchema(format!(
                    "duplicate entity type: {}",
                    def.name
                )));
            }
            for (i, field) in def.fields.iter().enumerate() {
                check_ident(field.name)?;
                if field.name == ID_COLUMN {
                    return Err(CoreError::InvalidSchema(format!(
                        "{}.{ID_COLUMN} is the identity column and cannot be declared as a field",
                        def.name
                    )));
                }
                if def.fields[..i].iter().any(|f| f.name == field.name) {
                    return Err(CoreError::InvalidSchema(format!(
                        "duplicate field {}.{}",
                        def.name, field.name
                    )));
                }
            }
        }
        Ok(Self { entities })
    }

    pub fn entity(&self, name: &str) -> Result<&'static EntityDef, CoreError> {
        self.entities
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownEntity(name.to_string()))
    }

    pub fn field(&self, entity_type: &str, field: &str) -> Result<&'static FieldDef, CoreError> {
        let def = self.entity(entity_type)?;
        def.fields
            .iter()
            .find(|f| f.name == field)
            .ok_or_else(|| CoreError::UnknownField {
                entity_type: def.name.to_string(),
                field: field.to_string(),
            })
    }

    pub fn entities(&self) -> impl Iterator<Item = &'static EntityDef> + '_ {
        self.entities.values().copied()
    }
}

/// Accepts `[a-z_][a-z0-9_]*`, and nothing in SQLite's own namespace.
fn check_ident(name: &str) -> Result<(), CoreError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_head || !valid_tail || name.starts_with("sqlite_") {
        return Err(CoreError::InvalidSchema(format!("invalid identifier: {name:?}")));
    }
    Ok(())
}
