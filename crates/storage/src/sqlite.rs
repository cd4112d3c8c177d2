use std::path::Path;
use std::sync::Arc;

use log::debug;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use undolog_core::schema::ID_COLUMN;
use undolog_core::{
    ActorId, Change, CoreError, EntityDef, EntityId, EntryId, FieldDef, FieldMap, FieldValue,
    Hlc, LogEntry, NewEntry, OperationKind, SchemaGuard, Snapshot,
};

use crate::error::StorageError;
use crate::row::{from_sql, to_sql};
use crate::schema::quote;
use crate::traits::{Connected, LogStore, RowStore};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn to_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub struct SqliteStorage {
    conn: Connection,
    guard: Arc<SchemaGuard>,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>, guard: Arc<SchemaGuard>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn, &guard)?;
        Ok(Self { conn, guard })
    }

    pub fn open_in_memory(guard: Arc<SchemaGuard>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn, &guard)?;
        Ok(Self { conn, guard })
    }

    /// Begin a write transaction. The write lock is taken up front
    /// (`BEGIN IMMEDIATE`), so two connections never both read a row and then
    /// race to change it.
    pub fn transaction(&mut self) -> Result<StorageTx<'_>, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(StorageTx {
            tx,
            guard: &self.guard,
        })
    }

    pub fn schema(&self) -> &Arc<SchemaGuard> {
        &self.guard
    }
}

impl Connected for SqliteStorage {
    fn conn(&self) -> &Connection {
        &self.conn
    }

    fn guard(&self) -> &SchemaGuard {
        &self.guard
    }
}

/// An open write transaction. Dropping it without `commit` rolls back.
pub struct StorageTx<'a> {
    tx: Transaction<'a>,
    guard: &'a SchemaGuard,
}

impl StorageTx<'_> {
    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback()?;
        Ok(())
    }
}

impl Connected for StorageTx<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }

    fn guard(&self) -> &SchemaGuard {
        self.guard
    }
}

// ============================================================================
// Log store
// ============================================================================

const ENTRY_COLUMNS: &str =
    "id, actor_id, op_kind, entity_type, entity_id, prior_state, new_state, created_at, rolled_back";

struct RawEntry {
    id: i64,
    actor_id: String,
    op_kind: String,
    entity_type: String,
    entity_id: Vec<u8>,
    prior_state: Option<Vec<u8>>,
    new_state: Option<Vec<u8>>,
    created_at: Vec<u8>,
    rolled_back: bool,
}

fn read_raw(row: &rusqlite::Row) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        op_kind: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        prior_state: row.get(5)?,
        new_state: row.get(6)?,
        created_at: row.get(7)?,
        rolled_back: row.get(8)?,
    })
}

impl RawEntry {
    fn into_entry(self) -> Result<LogEntry, StorageError> {
        let kind = OperationKind::parse(&self.op_kind)?;
        let prior = self
            .prior_state
            .as_deref()
            .map(Snapshot::from_msgpack)
            .transpose()?;
        let new = self
            .new_state
            .as_deref()
            .map(Snapshot::from_msgpack)
            .transpose()?;
        Ok(LogEntry {
            id: EntryId::from_raw(self.id),
            actor: ActorId::new(self.actor_id),
            entity_type: self.entity_type,
            entity_id: EntityId::from_bytes(to_array::<16>(self.entity_id, "entity_id")?),
            change: Change::from_parts(kind, prior, new)?,
            created_at: Hlc::from_slice(&self.created_at)?,
            rolled_back: self.rolled_back,
        })
    }
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<LogEntry>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, read_raw)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawEntry::into_entry).collect()
}

impl<T: Connected> LogStore for T {
    fn append(&mut self, entry: &NewEntry) -> Result<EntryId, StorageError> {
        let prior = entry.change.prior().map(Snapshot::to_msgpack).transpose()?;
        let new = entry.change.new_state().map(Snapshot::to_msgpack).transpose()?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO change_log (actor_id, op_kind, entity_type, entity_id, prior_state, new_state, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.actor.as_str(),
                entry.change.kind().as_str(),
                entry.entity_type,
                entry.entity_id.as_bytes().as_slice(),
                prior,
                new,
                &entry.created_at.to_bytes()[..],
            ],
        )?;
        let id = EntryId::from_raw(conn.last_insert_rowid());
        debug!(
            "appended {id} {} {}/{} for {}",
            entry.change.kind(),
            entry.entity_type,
            entry.entity_id,
            entry.actor
        );
        Ok(id)
    }

    fn get_entry(&self, id: EntryId) -> Result<Option<LogEntry>, StorageError> {
        let raw = self
            .conn()
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM change_log WHERE id = ?1"),
                rusqlite::params![id.as_raw()],
                read_raw,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    fn list_by_actor(&self, actor: &ActorId, limit: usize) -> Result<Vec<LogEntry>, StorageError> {
        query_entries(
            self.conn(),
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM change_log WHERE actor_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            rusqlite::params![actor.as_str(), to_limit(limit)],
        )
    }

    fn select_undoable(
        &self,
        actor: &ActorId,
        count: usize,
    ) -> Result<Vec<LogEntry>, StorageError> {
        query_entries(
            self.conn(),
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM change_log WHERE actor_id = ?1 AND rolled_back = 0 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            rusqlite::params![actor.as_str(), to_limit(count)],
        )
    }

    fn undoable_count(&self, actor: &ActorId) -> Result<u64, StorageError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM change_log WHERE actor_id = ?1 AND rolled_back = 0",
            rusqlite::params![actor.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn mark_rolled_back(&mut self, id: EntryId) -> Result<(), StorageError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE change_log SET rolled_back = 1 WHERE id = ?1 AND rolled_back = 0",
            rusqlite::params![id.as_raw()],
        )?;
        if changed == 1 {
            return Ok(());
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM change_log WHERE id = ?1)",
            rusqlite::params![id.as_raw()],
            |row| row.get(0),
        )?;
        if exists {
            Err(StorageError::AlreadyRolledBack { entry_id: id })
        } else {
            Err(StorageError::NotFound(format!("log entry {id}")))
        }
    }

    fn latest_timestamp(&self, actor: &ActorId) -> Result<Option<Hlc>, StorageError> {
        let bytes: Option<Vec<u8>> = self.conn().query_row(
            "SELECT max(created_at) FROM change_log WHERE actor_id = ?1",
            rusqlite::params![actor.as_str()],
            |row| row.get(0),
        )?;
        Ok(bytes.as_deref().map(Hlc::from_slice).transpose()?)
    }
}

// ============================================================================
// Row store
// ============================================================================

/// Resolve the caller's definition to the guard's own. Only the guard's
/// names are ever formatted into SQL.
fn resolve_entity(
    guard: &SchemaGuard,
    def: &EntityDef,
) -> Result<&'static EntityDef, StorageError> {
    Ok(guard.entity(def.name)?)
}

fn resolve_fields<'v>(
    guard: &SchemaGuard,
    fields: &'v FieldMap,
) -> Result<(&'static EntityDef, Vec<(&'static FieldDef, &'v FieldValue)>), StorageError> {
    let entity = resolve_entity(guard, fields.entity)?;
    let mut resolved = Vec::with_capacity(fields.values.len());
    for (def, value) in &fields.values {
        let field = guard.field(entity.name, def.name)?;
        if !value.fits(field.kind) {
            return Err(CoreError::InvalidData(format!(
                "{}.{} expects {:?}, got {:?}",
                entity.name, field.name, field.kind, value
            ))
            .into());
        }
        resolved.push((field, value));
    }
    Ok((entity, resolved))
}

impl<T: Connected> RowStore for T {
    fn get_row(&self, def: &EntityDef, id: EntityId) -> Result<Option<FieldMap>, StorageError> {
        let entity = resolve_entity(self.guard(), def)?;
        let columns: Vec<String> = std::iter::once(ID_COLUMN)
            .chain(entity.fields.iter().map(|f| f.name))
            .map(quote)
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            columns.join(", "),
            quote(entity.name),
            quote(ID_COLUMN)
        );
        let raw: Option<Vec<Value>> = self
            .conn()
            .query_row(&sql, rusqlite::params![id.as_bytes().as_slice()], |row| {
                (1..columns.len())
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(entity.fields.len());
        for (field, value) in entity.fields.iter().zip(raw.iter()) {
            values.push((field, from_sql(field.kind, field.name, value.into())?));
        }
        Ok(Some(FieldMap { entity, values }))
    }

    fn insert_row(&mut self, id: EntityId, fields: &FieldMap) -> Result<(), StorageError> {
        let (entity, resolved) = resolve_fields(self.guard(), fields)?;
        let mut columns = vec![quote(ID_COLUMN)];
        let mut params = vec![Value::Blob(id.as_bytes().to_vec())];
        for (field, value) in &resolved {
            columns.push(quote(field.name));
            params.push(to_sql(value));
        }
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(entity.name),
            columns.join(", "),
            placeholders.join(", ")
        );
        match self.conn().execute(&sql, rusqlite::params_from_iter(params)) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::RowCollision {
                    entity_type: entity.name.to_string(),
                    entity_id: id.to_string(),
                })
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn update_row(&mut self, id: EntityId, fields: &FieldMap) -> Result<bool, StorageError> {
        let (entity, resolved) = resolve_fields(self.guard(), fields)?;
        if resolved.is_empty() {
            return Ok(self.get_row(entity, id)?.is_some());
        }
        let mut params = vec![Value::Blob(id.as_bytes().to_vec())];
        let mut assignments = Vec::with_capacity(resolved.len());
        for (field, value) in &resolved {
            params.push(to_sql(value));
            assignments.push(format!("{} = ?{}", quote(field.name), params.len()));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?1",
            quote(entity.name),
            assignments.join(", "),
            quote(ID_COLUMN)
        );
        let changed = self.conn().execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(changed > 0)
    }

    fn delete_row(&mut self, def: &EntityDef, id: EntityId) -> Result<bool, StorageError> {
        let entity = resolve_entity(self.guard(), def)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(entity.name),
            quote(ID_COLUMN)
        );
        let changed = self
            .conn()
            .execute(&sql, rusqlite::params![id.as_bytes().as_slice()])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use undolog_core::{FieldKind, HlcClock};

    const CARD_FIELDS: &[FieldDef] = &[
        FieldDef { name: "title", kind: FieldKind::Text },
        FieldDef { name: "position", kind: FieldKind::Integer },
        FieldDef { name: "done", kind: FieldKind::Boolean },
    ];
    static DEFS: &[EntityDef] = &[EntityDef { name: "card", fields: CARD_FIELDS }];

    fn storage() -> SqliteStorage {
        SqliteStorage::open_in_memory(Arc::new(SchemaGuard::new(DEFS).unwrap())).unwrap()
    }

    fn card_fields(guard: &SchemaGuard, title: &str, position: i64) -> FieldMap {
        Snapshot::encode(
            guard.entity("card").unwrap(),
            [("title", FieldValue::from(title)), ("position", FieldValue::from(position))],
        )
        .decode(guard)
        .unwrap()
    }

    fn insert_entry(clock: &mut HlcClock, actor: &str, title: &str) -> NewEntry {
        let guard = SchemaGuard::new(DEFS).unwrap();
        let new = Snapshot::encode(
            guard.entity("card").unwrap(),
            [("title", FieldValue::from(title))],
        );
        NewEntry {
            actor: ActorId::from(actor),
            entity_type: "card",
            entity_id: EntityId::new(),
            change: Change::Insert { new },
            created_at: clock.tick().unwrap(),
        }
    }

    #[test]
    fn append_and_read_back() {
        let mut storage = storage();
        let mut clock = HlcClock::new();
        let entry = insert_entry(&mut clock, "alice", "Draft");
        let id = storage.append(&entry).unwrap();

        let stored = storage.get_entry(id).unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.actor, ActorId::from("alice"));
        assert_eq!(stored.kind(), OperationKind::Insert);
        assert_eq!(stored.entity_id, entry.entity_id);
        assert_eq!(stored.created_at, entry.created_at);
        assert_eq!(stored.new_state().unwrap().get("title"), Some(&FieldValue::from("Draft")));
        assert!(stored.prior_state().is_none());
        assert!(!stored.rolled_back);

        assert!(storage.get_entry(EntryId::from_raw(999)).unwrap().is_none());
    }

    #[test]
    fn select_undoable_is_newest_first_and_skips_rolled_back() {
        let mut storage = storage();
        let mut clock = HlcClock::new();
        let ids: Vec<EntryId> = (0..4)
            .map(|i| storage.append(&insert_entry(&mut clock, "alice", &format!("c{i}"))).unwrap())
            .collect();
        storage.append(&insert_entry(&mut clock, "bob", "other")).unwrap();

        let picked: Vec<EntryId> = storage
            .select_undoable(&ActorId::from("alice"), 2)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(picked, vec![ids[3], ids[2]]);

        storage.mark_rolled_back(ids[3]).unwrap();
        let picked: Vec<EntryId> = storage
            .select_undoable(&ActorId::from("alice"), 10)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(picked, vec![ids[2], ids[1], ids[0]]);
        assert_eq!(storage.undoable_count(&ActorId::from("alice")).unwrap(), 3);

        let history = storage.list_by_actor(&ActorId::from("alice"), 10).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].id, ids[3]);
        assert!(history[0].rolled_back);
    }

    #[test]
    fn ties_on_timestamp_break_by_id() {
        let mut storage = storage();
        let mut clock = HlcClock::new();
        let mut first = insert_entry(&mut clock, "alice", "a");
        let mut second = insert_entry(&mut clock, "alice", "b");
        let stamp = Hlc::new(1_000, 0);
        first.created_at = stamp;
        second.created_at = stamp;
        let a = storage.append(&first).unwrap();
        let b = storage.append(&second).unwrap();

        let picked = storage.select_undoable(&ActorId::from("alice"), 2).unwrap();
        assert_eq!(picked[0].id, b);
        assert_eq!(picked[1].id, a);
    }

    #[test]
    fn mark_rolled_back_is_one_way() {
        let mut storage = storage();
        let mut clock = HlcClock::new();
        let id = storage.append(&insert_entry(&mut clock, "alice", "x")).unwrap();

        storage.mark_rolled_back(id).unwrap();
        match storage.mark_rolled_back(id) {
            Err(StorageError::AlreadyRolledBack { entry_id }) => assert_eq!(entry_id, id),
            other => panic!("expected AlreadyRolledBack, got {other:?}"),
        }
        assert!(matches!(
            storage.mark_rolled_back(EntryId::from_raw(42)),
            Err(StorageError::NotFound(_))
        ));

        let reset = storage.conn().execute(
            "UPDATE change_log SET rolled_back = 0 WHERE id = ?1",
            rusqlite::params![id.as_raw()],
        );
        assert!(reset.is_err(), "trigger must refuse clearing the flag");
        let rewrite = storage.conn().execute(
            "UPDATE change_log SET actor_id = 'mallory' WHERE id = ?1",
            rusqlite::params![id.as_raw()],
        );
        assert!(rewrite.is_err(), "trigger must refuse rewriting history");
    }

    #[test]
    fn row_crud_roundtrip() {
        let mut storage = storage();
        let guard = storage.schema().clone();
        let def = guard.entity("card").unwrap();
        let id = EntityId::new();

        storage.insert_row(id, &card_fields(&guard, "Plan", 1)).unwrap();
        let row = storage.get_row(def, id).unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&FieldValue::from("Plan")));
        assert_eq!(row.get("position"), Some(&FieldValue::Integer(1)));
        assert_eq!(row.get("done"), Some(&FieldValue::Null));

        assert!(matches!(
            storage.insert_row(id, &card_fields(&guard, "Dup", 2)),
            Err(StorageError::RowCollision { .. })
        ));

        let patch = Snapshot::encode(def, [("done", FieldValue::Boolean(true))])
            .decode(&guard)
            .unwrap();
        assert!(storage.update_row(id, &patch).unwrap());
        let row = storage.get_row(def, id).unwrap().unwrap();
        assert_eq!(row.get("done"), Some(&FieldValue::Boolean(true)));
        assert_eq!(row.get("title"), Some(&FieldValue::from("Plan")));

        assert!(storage.delete_row(def, id).unwrap());
        assert!(!storage.delete_row(def, id).unwrap());
        assert!(!storage.update_row(id, &patch).unwrap());
        assert!(storage.get_row(def, id).unwrap().is_none());
    }

    #[test]
    fn rows_reject_definitions_outside_the_guard() {
        static ROGUE: EntityDef = EntityDef {
            name: "card\"; DROP TABLE change_log; --",
            fields: &[],
        };
        let storage = storage();
        assert!(matches!(
            storage.get_row(&ROGUE, EntityId::new()),
            Err(StorageError::Core(CoreError::UnknownEntity(_)))
        ));
    }

    #[test]
    fn transaction_drop_rolls_back() {
        let mut storage = storage();
        let mut clock = HlcClock::new();
        {
            let mut tx = storage.transaction().unwrap();
            tx.append(&insert_entry(&mut clock, "alice", "gone")).unwrap();
        }
        assert!(storage.list_by_actor(&ActorId::from("alice"), 10).unwrap().is_empty());

        let mut tx = storage.transaction().unwrap();
        tx.append(&insert_entry(&mut clock, "alice", "kept")).unwrap();
        tx.commit().unwrap();
        assert_eq!(storage.list_by_actor(&ActorId::from("alice"), 10).unwrap().len(), 1);
        assert!(storage.latest_timestamp(&ActorId::from("alice")).unwrap().is_some());
        assert!(storage.latest_timestamp(&ActorId::from("bob")).unwrap().is_none());
    }

    #[test]
    fn claim_is_visible_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let guard = Arc::new(SchemaGuard::new(DEFS).unwrap());
        let mut first = SqliteStorage::open(&path, guard.clone()).unwrap();
        let mut second = SqliteStorage::open(&path, guard).unwrap();
        let mut clock = HlcClock::new();
        let id = first.append(&insert_entry(&mut clock, "alice", "shared")).unwrap();

        assert_eq!(second.undoable_count(&ActorId::from("alice")).unwrap(), 1);
        let mut tx = second.transaction().unwrap();
        tx.mark_rolled_back(id).unwrap();
        tx.commit().unwrap();

        assert!(matches!(
            first.mark_rolled_back(id),
            Err(StorageError::AlreadyRolledBack { .. })
        ));
        assert_eq!(first.undoable_count(&ActorId::from("alice")).unwrap(), 0);
    }
}
