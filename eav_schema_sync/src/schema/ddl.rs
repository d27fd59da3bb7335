//! DDL rendering for schema differences
//!
//! Turns one [`SchemaDifference`] into the statements that fix it (forward)
//! or undo that fix (reverse). Differences that cannot be fixed safely by
//! generated DDL come back as [`DdlPlan::Manual`].

use crate::db::dialect::Dialect;
use crate::schema::comparator::index_name;
use crate::schema::difference::{DifferenceType, SchemaDifference};
use crate::schema::types::BackendType;

/// Statements for one difference, or a note that a human has to act
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlPlan {
    Statements(Vec<String>),
    Manual(String),
}

/// Dialect-aware DDL renderer
#[derive(Debug, Clone, Copy)]
pub struct DdlRenderer {
    dialect: Dialect,
}

impl DdlRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Statements that bring the database in line with the configuration
    pub fn forward(&self, difference: &SchemaDifference) -> DdlPlan {
        let Some(table) = difference.table_name() else {
            return manual(difference);
        };

        match difference.kind() {
            DifferenceType::MissingTable => {
                if difference.metadata_str("table_role") == Some("entity") {
                    DdlPlan::Statements(vec![self.create_entity_table(table)])
                } else {
                    match backend_of(difference) {
                        Some(backend) => {
                            DdlPlan::Statements(self.create_value_table(table, backend, difference))
                        }
                        None => manual(difference),
                    }
                }
            }
            DifferenceType::MissingColumn => match difference.column_name() {
                Some(column) => DdlPlan::Statements(vec![self.add_column(
                    table,
                    column,
                    backend_of(difference),
                )]),
                None => manual(difference),
            },
            DifferenceType::MissingIndex => {
                let columns = difference.metadata_strings("index_columns");
                if columns.is_empty() {
                    return manual(difference);
                }
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                let name = difference
                    .metadata_str("index_name")
                    .map(str::to_string)
                    .unwrap_or_else(|| index_name(table, &columns));
                DdlPlan::Statements(vec![self.create_index(
                    table,
                    &name,
                    &columns,
                    backend_of(difference),
                )])
            }
            DifferenceType::TypeMismatch
            | DifferenceType::ConstraintMismatch
            | DifferenceType::OrphanedTable
            | DifferenceType::OrphanedColumn => manual(difference),
        }
    }

    /// Statements that undo [`forward`](Self::forward)
    pub fn reverse(&self, difference: &SchemaDifference) -> DdlPlan {
        let Some(table) = difference.table_name() else {
            return manual(difference);
        };
        let q = |name: &str| self.dialect.quote_ident(name);

        match difference.kind() {
            DifferenceType::MissingTable => {
                DdlPlan::Statements(vec![format!("DROP TABLE IF EXISTS {}", q(table))])
            }
            DifferenceType::MissingColumn => match difference.column_name() {
                Some(column) => DdlPlan::Statements(vec![format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    q(table),
                    q(column)
                )]),
                None => manual(difference),
            },
            DifferenceType::MissingIndex => match difference.metadata_str("index_name") {
                Some(name) => DdlPlan::Statements(vec![self.dialect.drop_index_sql(table, name)]),
                None => manual(difference),
            },
            _ => manual(difference),
        }
    }

    pub fn create_entity_table(&self, table: &str) -> String {
        let q = |name: &str| self.dialect.quote_ident(name);
        format!(
            "CREATE TABLE {} ({}, {} DATETIME NULL, {} DATETIME NULL)",
            q(table),
            self.dialect.auto_increment_primary_key("entity_id"),
            q("created_at"),
            q("updated_at")
        )
    }

    /// Value table plus the indexes recorded on the difference
    pub fn create_value_table(
        &self,
        table: &str,
        backend: BackendType,
        difference: &SchemaDifference,
    ) -> Vec<String> {
        let q = |name: &str| self.dialect.quote_ident(name);
        let mut statements = vec![format!(
            "CREATE TABLE {} ({}, {} INT NOT NULL, {} INT NOT NULL, {} {} NULL)",
            q(table),
            self.dialect.auto_increment_primary_key("value_id"),
            q("attribute_id"),
            q("entity_id"),
            q("value"),
            backend.column_type()
        )];

        let indexes = difference
            .metadata()
            .get("indexes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for index in indexes {
            let columns: Vec<&str> = index
                .as_array()
                .map(|cols| cols.iter().filter_map(|c| c.as_str()).collect())
                .unwrap_or_default();
            if columns.is_empty() {
                continue;
            }
            statements.push(self.create_index(
                table,
                &index_name(table, &columns),
                &columns,
                Some(backend),
            ));
        }

        statements
    }

    /// `ALTER TABLE .. ADD COLUMN` for a canonical value-table column
    pub fn add_column(&self, table: &str, column: &str, backend: Option<BackendType>) -> String {
        let q = |name: &str| self.dialect.quote_ident(name);
        let definition = match (column, self.dialect) {
            ("value", _) => format!(
                "{} NULL",
                backend.map_or("TEXT", |b| b.column_type())
            ),
            ("value_id", Dialect::MySql) => "INT NOT NULL AUTO_INCREMENT PRIMARY KEY".to_string(),
            // SQLite cannot add a primary key to an existing table
            _ => "INT NOT NULL DEFAULT 0".to_string(),
        };

        format!("ALTER TABLE {} ADD COLUMN {} {}", q(table), q(column), definition)
    }

    pub fn create_index(
        &self,
        table: &str,
        name: &str,
        columns: &[&str],
        backend: Option<BackendType>,
    ) -> String {
        let q = |name: &str| self.dialect.quote_ident(name);
        let columns: Vec<String> = columns
            .iter()
            .map(|column| match (self.dialect, *column, backend) {
                // MySQL cannot index a TEXT column without a prefix length
                (Dialect::MySql, "value", Some(BackendType::Text)) => format!("{}(255)", q(column)),
                _ => q(column),
            })
            .collect();

        format!("CREATE INDEX {} ON {} ({})", q(name), q(table), columns.join(", "))
    }
}

fn backend_of(difference: &SchemaDifference) -> Option<BackendType> {
    difference
        .metadata_str("backend_type")
        .and_then(|b| b.parse().ok())
}

fn manual(difference: &SchemaDifference) -> DdlPlan {
    DdlPlan::Manual(format!("{}: {}", difference.kind(), difference.description()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::difference::{DifferenceAction, Severity};
    use pretty_assertions::assert_eq;

    fn missing_value_table() -> SchemaDifference {
        SchemaDifference::new(
            "product",
            DifferenceType::MissingTable,
            Severity::Critical,
            DifferenceAction::Add,
            "missing",
        )
        .with_table("product_text")
        .with_metadata("table_role", "value")
        .with_metadata("backend_type", "text")
        .with_metadata("indexes", serde_json::json!([["attribute_id", "value"]]))
    }

    #[test]
    fn creates_value_table_with_indexes() {
        let plan = DdlRenderer::new(Dialect::MySql).forward(&missing_value_table());

        assert_eq!(
            plan,
            DdlPlan::Statements(vec![
                "CREATE TABLE `product_text` (`value_id` INT NOT NULL AUTO_INCREMENT PRIMARY KEY, \
                 `attribute_id` INT NOT NULL, `entity_id` INT NOT NULL, `value` TEXT NULL)"
                    .to_string(),
                "CREATE INDEX `idx_product_text_attribute_id_value` ON `product_text` \
                 (`attribute_id`, `value`(255))"
                    .to_string(),
            ])
        );
    }

    #[test]
    fn creates_sqlite_entity_table() {
        let difference = SchemaDifference::new(
            "product",
            DifferenceType::MissingTable,
            Severity::Critical,
            DifferenceAction::Add,
            "missing",
        )
        .with_table("product")
        .with_metadata("table_role", "entity");

        assert_eq!(
            DdlRenderer::new(Dialect::Sqlite).forward(&difference),
            DdlPlan::Statements(vec![
                "CREATE TABLE \"product\" (\"entity_id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
                 \"created_at\" DATETIME NULL, \"updated_at\" DATETIME NULL)"
                    .to_string()
            ])
        );
    }

    #[test]
    fn adds_columns_with_backend_type() {
        let renderer = DdlRenderer::new(Dialect::Sqlite);

        assert_eq!(
            renderer.add_column("product_decimal", "value", Some(BackendType::Decimal)),
            "ALTER TABLE \"product_decimal\" ADD COLUMN \"value\" DECIMAL(12,4) NULL"
        );
        assert_eq!(
            renderer.add_column("product_decimal", "entity_id", Some(BackendType::Decimal)),
            "ALTER TABLE \"product_decimal\" ADD COLUMN \"entity_id\" INT NOT NULL DEFAULT 0"
        );
    }

    #[test]
    fn reverses_additions() {
        let renderer = DdlRenderer::new(Dialect::MySql);
        assert_eq!(
            renderer.reverse(&missing_value_table()),
            DdlPlan::Statements(vec!["DROP TABLE IF EXISTS `product_text`".to_string()])
        );

        let index = SchemaDifference::new(
            "product",
            DifferenceType::MissingIndex,
            Severity::Medium,
            DifferenceAction::Add,
            "missing index",
        )
        .with_table("product_int")
        .with_metadata("index_name", "idx_product_int_attribute_id_value");
        assert_eq!(
            renderer.reverse(&index),
            DdlPlan::Statements(vec![
                "DROP INDEX `idx_product_int_attribute_id_value` ON `product_int`".to_string()
            ])
        );
    }

    #[test]
    fn mismatches_and_drops_are_manual() {
        let renderer = DdlRenderer::new(Dialect::MySql);
        for (kind, action) in [
            (DifferenceType::TypeMismatch, DifferenceAction::Modify),
            (DifferenceType::ConstraintMismatch, DifferenceAction::Modify),
            (DifferenceType::OrphanedTable, DifferenceAction::Drop),
        ] {
            let difference =
                SchemaDifference::new("product", kind, Severity::High, action, "needs care")
                    .with_table("product_decimal");
            assert_eq!(
                renderer.forward(&difference),
                DdlPlan::Manual(format!("{}: needs care", kind))
            );
        }
    }
}
