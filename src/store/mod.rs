//! Persistence layer: libSQL-backed storage for users, practices and progress.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
