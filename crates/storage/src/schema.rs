use rusqlite::Connection;
use undolog_core::schema::{EntityDef, ID_COLUMN};
use undolog_core::SchemaGuard;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection, guard: &SchemaGuard) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, unixepoch())",
        [SCHEMA_VERSION],
    )?;
    for def in guard.entities() {
        conn.execute_batch(&entity_table_sql(def))?;
    }
    Ok(())
}

/// Wrap an identifier taken from a static definition in double quotes.
/// The guard only admits `[a-z_][a-z0-9_]*`, so no escaping is needed.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn entity_table_sql(def: &EntityDef) -> String {
    let mut columns = vec![format!(
        "{id} BLOB PRIMARY KEY CHECK (length({id}) = 16)",
        id = quote(ID_COLUMN)
    )];
    for field in def.fields {
        columns.push(format!("{} {}", quote(field.name), field.kind.sql_type()));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote(def.name),
        columns.join(",\n    ")
    )
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id TEXT NOT NULL,
    op_kind TEXT NOT NULL CHECK (op_kind IN ('insert', 'update', 'delete')),
    entity_type TEXT NOT NULL,
    entity_id BLOB NOT NULL CHECK (length(entity_id) = 16),
    prior_state BLOB,
    new_state BLOB,
    created_at BLOB NOT NULL CHECK (length(created_at) = 12),
    rolled_back INTEGER NOT NULL DEFAULT 0 CHECK (rolled_back IN (0, 1)),
    CHECK ((op_kind = 'insert') = (prior_state IS NULL)),
    CHECK ((op_kind = 'delete') = (new_state IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_change_log_actor ON change_log (actor_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_change_log_undoable ON change_log (actor_id, created_at, id)
    WHERE rolled_back = 0;

CREATE TRIGGER IF NOT EXISTS change_log_immutable
BEFORE UPDATE ON change_log
WHEN NEW.actor_id IS NOT OLD.actor_id
  OR NEW.op_kind IS NOT OLD.op_kind
  OR NEW.entity_type IS NOT OLD.entity_type
  OR NEW.entity_id IS NOT OLD.entity_id
  OR NEW.prior_state IS NOT OLD.prior_state
  OR NEW.new_state IS NOT OLD.new_state
  OR NEW.created_at IS NOT OLD.created_at
  OR NOT (OLD.rolled_back = 0 AND NEW.rolled_back = 1)
BEGIN
    SELECT RAISE(ABORT, 'change_log entries only allow rolled_back 0 -> 1');
END;
";
