pub mod host;
pub mod schema;
pub mod shared;

pub use host::{TestHost, init_logging};
pub use schema::{Card, KANBAN, id_ref, kanban_guard};
pub use shared::SharedDb;
