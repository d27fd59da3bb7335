//! Physical schema introspection
//!
//! Reads tables, columns, indexes and foreign keys of an entity type's tables
//! from the live database, with one introspector per SQL dialect.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::db::dialect::Dialect;
use crate::db::executor::{SqlExecutor, SqlRow, SqlValue};
use crate::error::{Error, Result};
use crate::schema::types::{
    BackendType, ColumnInfo, DatabaseSchema, EntityTypeConfig, ForeignKey, IndexInfo, TableSchema,
};

/// Dialect-specific schema introspection
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Check whether a base table exists
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Read columns, indexes and foreign keys of an existing table
    async fn describe_table(&self, table: &str) -> Result<TableSchema>;

    /// Statements that recreate an existing table (and its indexes)
    async fn create_table_statements(&self, table: &str) -> Result<Vec<String>>;
}

/// Pick the introspector for the executor's dialect
pub fn introspector_for(executor: &dyn SqlExecutor) -> Box<dyn Introspector + '_> {
    match executor.dialect() {
        Dialect::MySql => Box::new(MySqlIntrospector { executor }),
        Dialect::Sqlite => Box::new(SqliteIntrospector { executor }),
    }
}

/// Introspect the entity table and every possible value table of an entity type.
///
/// Value tables of all backend types are probed, not only the configured
/// ones, so orphaned tables show up in the schema.
pub async fn introspect_entity_schema(
    executor: &dyn SqlExecutor,
    config: &EntityTypeConfig,
) -> Result<DatabaseSchema> {
    let introspector = introspector_for(executor);
    let mut schema = DatabaseSchema::new(&config.entity_type_code);

    let candidates = std::iter::once(config.entity_table.clone())
        .chain(BackendType::ALL.into_iter().map(|b| config.value_table(b)));

    for table in candidates {
        if introspector.table_exists(&table).await? {
            schema.add_table(introspector.describe_table(&table).await?);
        }
    }

    tracing::debug!(
        entity_type = %config.entity_type_code,
        tables = schema.tables.len(),
        "Introspected entity schema"
    );

    Ok(schema)
}

/// Row count of a table, used for risk estimation
pub async fn count_rows(executor: &dyn SqlExecutor, table: &str) -> Result<u64> {
    let sql = format!(
        "SELECT COUNT(*) AS row_count FROM {}",
        executor.dialect().quote_ident(table)
    );
    let rows = executor.query(&sql, &[]).await.map_err(|e| storage(table, e))?;

    Ok(rows
        .first()
        .and_then(|row| row.int("row_count"))
        .map_or(0, |n| n.max(0) as u64))
}

fn storage(table: &str, error: Error) -> Error {
    match error {
        Error::Storage(_) => error,
        other => Error::Storage(format!("Failed to introspect table {}: {}", table, other)),
    }
}

/// Escape LIKE wildcards so the pattern matches the name literally
fn like_pattern(name: &str) -> String {
    name.replace('\\', "\\\\")
        .replace('_', "\\_")
        .replace('%', "\\%")
}

/// MySQL / MariaDB introspector using SHOW statements
pub struct MySqlIntrospector<'a> {
    executor: &'a dyn SqlExecutor,
}

impl<'a> MySqlIntrospector<'a> {
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self { executor }
    }

    async fn run(&self, table: &str, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.executor
            .query(sql, args)
            .await
            .map_err(|e| storage(table, e))
    }
}

#[async_trait]
impl<'a> Introspector for MySqlIntrospector<'a> {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = format!(
            "SHOW TABLES LIKE {}",
            Dialect::MySql.quote_literal(&like_pattern(table))
        );
        let rows = self.run(table, &sql, &[]).await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get_index(0).and_then(SqlValue::as_text))
            .any(|name| name == table))
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        let quoted = Dialect::MySql.quote_ident(table);
        let mut schema = TableSchema::new(table);

        // Columns
        let rows = self
            .run(table, &format!("SHOW COLUMNS FROM {}", quoted), &[])
            .await?;
        for row in rows {
            let Some(name) = row.text("Field") else {
                continue;
            };
            let mut column = ColumnInfo::new(&name, &row.text("Type").unwrap_or_default())
                .nullable(row.text("Null").as_deref() == Some("YES"));
            column.key = row.text("Key").filter(|k| !k.is_empty());
            column.default = row.text("Default");
            column.extra = row.text("Extra").filter(|e| !e.is_empty());
            schema.add_column(column);
        }

        // Indexes
        let rows = self
            .run(table, &format!("SHOW INDEXES FROM {}", quoted), &[])
            .await?;
        let mut indexes: BTreeMap<String, Vec<(i64, String)>> = BTreeMap::new();
        let mut details: BTreeMap<String, (bool, Option<String>)> = BTreeMap::new();
        for row in rows {
            let (Some(key_name), Some(column)) = (row.text("Key_name"), row.text("Column_name"))
            else {
                continue;
            };
            let seq = row.int("Seq_in_index").unwrap_or(0);
            details
                .entry(key_name.clone())
                .or_insert_with(|| (row.int("Non_unique") == Some(0), row.text("Index_type")));
            indexes.entry(key_name).or_default().push((seq, column));
        }
        for (name, mut columns) in indexes {
            columns.sort_by_key(|(seq, _)| *seq);
            let (unique, index_type) = details.remove(&name).unwrap_or((false, None));
            schema.add_index(IndexInfo {
                name,
                unique,
                columns: columns.into_iter().map(|(_, c)| c).collect(),
                index_type,
            });
        }

        // Foreign keys
        let sql = r#"
            SELECT
                CONSTRAINT_NAME AS constraint_name,
                COLUMN_NAME AS column_name,
                REFERENCED_TABLE_NAME AS ref_table,
                REFERENCED_COLUMN_NAME AS ref_column
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE()
              AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
        "#;
        let rows = self.run(table, sql, &[SqlValue::from(table)]).await?;
        for fk in group_foreign_keys(rows.iter().filter_map(|row| {
            Some((
                row.text("constraint_name")?,
                row.text("column_name")?,
                row.text("ref_table")?,
                row.text("ref_column")?,
            ))
        })) {
            schema.add_foreign_key(fk);
        }

        Ok(schema)
    }

    async fn create_table_statements(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("SHOW CREATE TABLE {}", Dialect::MySql.quote_ident(table));
        let rows = self.run(table, &sql, &[]).await?;

        let statement = rows
            .first()
            .and_then(|row| row.get_index(1).and_then(SqlValue::as_text))
            .ok_or_else(|| Error::Storage(format!("No CREATE TABLE statement for {}", table)))?;

        Ok(vec![statement])
    }
}

/// SQLite introspector using `sqlite_master` and PRAGMAs
pub struct SqliteIntrospector<'a> {
    executor: &'a dyn SqlExecutor,
}

impl<'a> SqliteIntrospector<'a> {
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self { executor }
    }

    async fn run(&self, table: &str, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.executor
            .query(sql, args)
            .await
            .map_err(|e| storage(table, e))
    }
}

#[async_trait]
impl<'a> Introspector for SqliteIntrospector<'a> {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?";
        let rows = self.run(table, sql, &[SqlValue::from(table)]).await?;
        Ok(!rows.is_empty())
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        let quoted = Dialect::Sqlite.quote_ident(table);
        let mut schema = TableSchema::new(table);

        let rows = self
            .run(table, &format!("PRAGMA table_info({})", quoted), &[])
            .await?;
        for row in rows {
            let Some(name) = row.text("name") else {
                continue;
            };
            let mut column = ColumnInfo::new(&name, &row.text("type").unwrap_or_default())
                .nullable(row.int("notnull") == Some(0));
            if row.int("pk").unwrap_or(0) > 0 {
                column.key = Some("PRI".to_string());
            }
            column.default = row.text("dflt_value");
            schema.add_column(column);
        }

        let index_rows = self
            .run(table, &format!("PRAGMA index_list({})", quoted), &[])
            .await?;
        for index_row in index_rows {
            let Some(index_name) = index_row.text("name") else {
                continue;
            };
            let info = self
                .run(
                    table,
                    &format!("PRAGMA index_info({})", Dialect::Sqlite.quote_ident(&index_name)),
                    &[],
                )
                .await?;
            let mut columns: Vec<(i64, String)> = info
                .iter()
                .filter_map(|row| Some((row.int("seqno")?, row.text("name")?)))
                .collect();
            columns.sort_by_key(|(seq, _)| *seq);

            schema.add_index(IndexInfo {
                name: index_name,
                unique: index_row.int("unique") == Some(1),
                columns: columns.into_iter().map(|(_, c)| c).collect(),
                index_type: index_row.text("origin"),
            });
        }

        let fk_rows = self
            .run(table, &format!("PRAGMA foreign_key_list({})", quoted), &[])
            .await?;
        for fk in group_foreign_keys(fk_rows.iter().filter_map(|row| {
            Some((
                format!("fk_{}_{}", table, row.int("id")?),
                row.text("from")?,
                row.text("table")?,
                row.text("to").unwrap_or_default(),
            ))
        })) {
            schema.add_foreign_key(fk);
        }

        Ok(schema)
    }

    async fn create_table_statements(&self, table: &str) -> Result<Vec<String>> {
        let sql = r#"
            SELECT sql FROM sqlite_master
            WHERE tbl_name = ? AND type IN ('table', 'index') AND sql IS NOT NULL
            ORDER BY CASE type WHEN 'table' THEN 0 ELSE 1 END, name
        "#;
        let rows = self.run(table, sql, &[SqlValue::from(table)]).await?;
        let statements: Vec<String> = rows.iter().filter_map(|row| row.text("sql")).collect();

        if statements.is_empty() {
            return Err(Error::Storage(format!(
                "No CREATE TABLE statement for {}",
                table
            )));
        }
        Ok(statements)
    }
}

/// Fold (constraint, column, ref table, ref column) rows into foreign keys
fn group_foreign_keys<I>(rows: I) -> Vec<ForeignKey>
where
    I: Iterator<Item = (String, String, String, String)>,
{
    let mut foreign_keys: Vec<ForeignKey> = Vec::new();
    for (name, column, ref_table, ref_column) in rows {
        match foreign_keys.iter_mut().find(|fk| fk.name == name) {
            Some(fk) => {
                fk.columns.push(column);
                fk.ref_columns.push(ref_column);
            }
            None => foreign_keys.push(ForeignKey {
                name,
                columns: vec![column],
                ref_table,
                ref_columns: vec![ref_column],
            }),
        }
    }
    foreign_keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(like_pattern("product_int"), "product\\_int");
        assert_eq!(like_pattern("100%"), "100\\%");
    }

    #[test]
    fn groups_composite_foreign_keys() {
        let rows = vec![
            ("fk_a".to_string(), "entity_id".to_string(), "product".to_string(), "entity_id".to_string()),
            ("fk_a".to_string(), "store_id".to_string(), "product".to_string(), "store_id".to_string()),
            ("fk_b".to_string(), "attribute_id".to_string(), "attribute".to_string(), "attribute_id".to_string()),
        ];
        let fks = group_foreign_keys(rows.into_iter());

        assert_eq!(fks.len(), 2);
        assert_eq!(fks[0].columns, vec!["entity_id", "store_id"]);
        assert_eq!(fks[1].ref_table, "attribute");
    }
}
