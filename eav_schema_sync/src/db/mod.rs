//! Database access
//!
//! Connections, dialect handling, SQL scripts and migration execution.

pub mod connection;
pub mod dialect;
pub mod executor;
pub mod migrations;
pub mod script;

pub use connection::DatabaseConnection;
pub use dialect::Dialect;
pub use executor::{Deadline, SqlExecutor, SqlRow, SqlTransaction, SqlValue};
pub use migrations::MigrationExecutor;
