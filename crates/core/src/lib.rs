pub mod entry;
pub mod error;
pub mod field_value;
pub mod hlc;
pub mod ids;
pub mod schema;
pub mod snapshot;

pub use entry::{Change, LogEntry, NewEntry, OperationKind};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use hlc::{Hlc, HlcClock};
pub use ids::*;
pub use schema::{EntityDef, FieldDef, FieldKind, SchemaGuard};
pub use snapshot::{Entity, FieldMap, Snapshot};
