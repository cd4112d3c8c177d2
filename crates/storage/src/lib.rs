pub mod error;
pub mod row;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use sqlite::{SqliteStorage, StorageTx};
pub use traits::*;
