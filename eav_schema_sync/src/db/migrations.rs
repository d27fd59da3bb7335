//! Migration execution
//!
//! Loads migration scripts and runs one direction of them inside a
//! transaction owned by the caller.

use std::fs;
use std::path::Path;

use crate::db::dialect::Dialect;
use crate::db::executor::SqlTransaction;
use crate::error::{Error, Result};
use crate::schema::generator::{Direction, Migration};

/// Runs generated migrations
#[derive(Debug, Clone, Copy)]
pub struct MigrationExecutor {
    dialect: Dialect,
}

impl MigrationExecutor {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Read and parse a migration file
    pub fn load(&self, path: &Path) -> Result<Migration> {
        let source = fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut migration = Migration::parse(&source, self.dialect)?;
        migration.path = Some(path.to_path_buf());
        Ok(migration)
    }

    /// Execute one direction of a migration on `tx`.
    ///
    /// Manual steps are logged and skipped. The caller commits or rolls back.
    pub async fn execute(
        &self,
        migration: &Migration,
        direction: Direction,
        tx: &mut dyn SqlTransaction,
    ) -> Result<usize> {
        for note in migration.manual_steps(direction) {
            tracing::warn!(
                migration = %migration.name,
                ?direction,
                note,
                "Migration contains a manual step"
            );
        }

        let statements = migration.statements(direction);
        for (i, statement) in statements.iter().enumerate() {
            tracing::debug!(
                migration = %migration.name,
                step = i + 1,
                sql = statement,
                "Executing migration statement"
            );
            tx.execute(statement, &[]).await.map_err(|e| {
                Error::Synchronization(format!(
                    "Migration {} failed at statement {}: {}",
                    migration.file_name(),
                    i + 1,
                    e
                ))
            })?;
        }

        tracing::info!(
            migration = %migration.name,
            ?direction,
            statements = statements.len(),
            "Migration executed"
        );
        Ok(statements.len())
    }
}
