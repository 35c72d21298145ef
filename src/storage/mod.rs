mod schema;
mod snapshot;
mod types;

pub use schema::{Database, DATABASE_FILE};
pub use types::DatabaseError;
