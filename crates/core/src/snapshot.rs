use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::EntityId;
use crate::schema::{EntityDef, FieldDef, SchemaGuard};

/// A typed host record that can be captured into a [`Snapshot`].
pub trait Entity {
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> EntityId;

    fn fields(&self) -> Vec<(&'static str, FieldValue)>;
}

/// Field-level state of one row, tagged with the entity type it belongs to.
///
/// A snapshot read back from the log is untrusted: its field names are plain
/// strings until [`Snapshot::decode`] has matched them against the guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    entity_type: String,
    fields: BTreeMap<String, FieldValue>,
}

/// A decoded snapshot. Every name in here is the guard's `&'static` copy.
#[derive(Debug, Clone)]
pub struct FieldMap {
    pub entity: &'static EntityDef,
    pub values: Vec<(&'static FieldDef, FieldValue)>,
}

impl FieldMap {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(def, _)| def.name == field)
            .map(|(_, v)| v)
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot::encode(
            self.entity,
            self.values.iter().map(|(def, v)| (def.name, v.clone())),
        )
    }

    /// Keep only the named fields, in definition order.
    pub fn restrict_to(&self, names: &[&str]) -> FieldMap {
        FieldMap {
            entity: self.entity,
            values: self
                .values
                .iter()
                .filter(|(def, _)| names.contains(&def.name))
                .cloned()
                .collect(),
        }
    }
}

impl Snapshot {
    /// Capture `fields` for an entity of type `def`. Fields the definition
    /// does not declare are left out, so this never fails.
    pub fn encode<K, I>(def: &EntityDef, fields: I) -> Self
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        let fields = fields
            .into_iter()
            .filter_map(|(k, v)| def.field(k.as_ref()).map(|f| (f.name.to_string(), v)))
            .collect();
        Self {
            entity_type: def.name.to_string(),
            fields,
        }
    }

    /// Capture every field of a typed entity.
    pub fn of<E: Entity>(entity: &E, guard: &SchemaGuard) -> Result<Self, CoreError> {
        let def = guard.entity(E::ENTITY_TYPE)?;
        Ok(Self::encode(def, entity.fields()))
    }

    /// Rehydrate a snapshot from stored or otherwise untrusted parts.
    pub fn from_untrusted(
        entity_type: impl Into<String>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// Validate every field name and value kind against the guard.
    pub fn decode(&self, guard: &SchemaGuard) -> Result<FieldMap, CoreError> {
        let entity = guard.entity(&self.entity_type)?;
        let mut values = Vec::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            let def = guard.field(entity.name, name)?;
            if !value.fits(def.kind) {
                return Err(CoreError::InvalidData(format!(
                    "{}.{} expects {:?}, snapshot holds {:?}",
                    entity.name, def.name, def.kind, value
                )));
            }
            values.push((def, value.clone()));
        }
        Ok(FieldMap { entity, values })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    const CARD_FIELDS: &[FieldDef] = &[
        FieldDef { name: "title", kind: FieldKind::Text },
        FieldDef { name: "position", kind: FieldKind::Integer },
        FieldDef { name: "done", kind: FieldKind::Boolean },
        FieldDef { name: "estimate", kind: FieldKind::Float },
    ];
    static DEFS: &[EntityDef] = &[EntityDef { name: "card", fields: CARD_FIELDS }];

    struct Card {
        id: EntityId,
        title: String,
        position: i64,
    }

    impl Entity for Card {
        const ENTITY_TYPE: &'static str = "card";

        fn id(&self) -> EntityId {
            self.id
        }

        fn fields(&self) -> Vec<(&'static str, FieldValue)> {
            vec![
                ("title", self.title.as_str().into()),
                ("position", self.position.into()),
            ]
        }
    }

    #[test]
    fn encode_drops_undeclared_fields() {
        let guard = SchemaGuard::new(DEFS).unwrap();
        let def = guard.entity("card").unwrap();
        let snap = Snapshot::encode(
            def,
            [
                ("title", FieldValue::from("Write docs")),
                ("owner", FieldValue::from("mallory")),
            ],
        );
        assert_eq!(snap.len(), 1);
        assert!(snap.get("owner").is_none());
        assert_eq!(snap.entity_type(), "card");
    }

    #[test]
    fn msgpack_keeps_value_kinds() {
        let guard = SchemaGuard::new(DEFS).unwrap();
        let def = guard.entity("card").unwrap();
        let snap = Snapshot::encode(
            def,
            [
                ("title", FieldValue::Text("1".into())),
                ("position", FieldValue::Integer(1)),
                ("done", FieldValue::Boolean(true)),
                ("estimate", FieldValue::Null),
            ],
        );
        let back = Snapshot::from_msgpack(&snap.to_msgpack().unwrap()).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.get("title"), Some(&FieldValue::Text("1".into())));
        assert_eq!(back.get("position"), Some(&FieldValue::Integer(1)));
        assert_eq!(back.get("done"), Some(&FieldValue::Boolean(true)));
        assert_eq!(back.get("estimate"), Some(&FieldValue::Null));
    }

    #[test]
    fn decode_rejects_unknown_field() {
        let guard = SchemaGuard::new(DEFS).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("title\" = NULL; --".to_string(), FieldValue::Null);
        let snap = Snapshot::from_untrusted("card", fields);
        match snap.decode(&guard) {
            Err(CoreError::UnknownField { entity_type, field }) => {
                assert_eq!(entity_type, "card");
                assert!(field.starts_with("title\""));
            }
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_mismatched_kind() {
        let guard = SchemaGuard::new(DEFS).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("position".to_string(), FieldValue::Text("three".into()));
        let snap = Snapshot::from_untrusted("card", fields);
        assert!(matches!(snap.decode(&guard), Err(CoreError::InvalidData(_))));
    }

    #[test]
    fn decode_uses_static_names() {
        let guard = SchemaGuard::new(DEFS).unwrap();
        let card = Card {
            id: EntityId::new(),
            title: "Ship it".into(),
            position: 3,
        };
        let map = Snapshot::of(&card, &guard).unwrap().decode(&guard).unwrap();
        assert_eq!(map.entity.name, "card");
        assert_eq!(map.values.len(), 2);
        assert_eq!(map.get("position"), Some(&FieldValue::Integer(3)));
    }
}
