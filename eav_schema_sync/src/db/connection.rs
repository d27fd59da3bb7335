//! Database connection handling
//!
//! This module provides the sqlx-backed implementation of
//! [`SqlExecutor`](crate::db::executor::SqlExecutor).

use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlPoolOptions, MySqlRow},
    sqlite::{SqlitePoolOptions, SqliteRow},
    Column, MySql, MySqlPool, Row, Sqlite, SqlitePool, Transaction, TypeInfo, ValueRef,
};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::db::dialect::Dialect;
use crate::db::executor::{SqlExecutor, SqlRow, SqlTransaction, SqlValue};
use crate::error::{Error, Result};

/// Enumeration of supported database types
#[derive(Debug, Clone)]
pub enum DatabaseConnection {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl DatabaseConnection {
    /// Create a new database connection from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool_size = config.pool_size.unwrap_or(10);
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(30));

        match Dialect::from_driver(&config.driver)? {
            Dialect::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                Ok(DatabaseConnection::MySql(pool))
            }
            Dialect::Sqlite => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(pool_size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await?;

                Ok(DatabaseConnection::Sqlite(pool))
            }
        }
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        match self {
            DatabaseConnection::MySql(pool) => pool.close().await,
            DatabaseConnection::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Bind every argument onto a sqlx query in order
macro_rules! bind_args {
    ($query:expr, $args:expr) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Int(v) => query.bind(*v),
                SqlValue::Float(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_str()),
            };
        }
        query
    }};
}

#[async_trait]
impl SqlExecutor for DatabaseConnection {
    fn dialect(&self) -> Dialect {
        match self {
            DatabaseConnection::MySql(_) => Dialect::MySql,
            DatabaseConnection::Sqlite(_) => Dialect::Sqlite,
        }
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        tracing::trace!(sql = sql, "query");
        match self {
            DatabaseConnection::MySql(pool) => {
                let rows = bind_args!(sqlx::query(sql), args).fetch_all(pool).await?;
                rows.iter().map(decode_mysql_row).collect()
            }
            DatabaseConnection::Sqlite(pool) => {
                let rows = bind_args!(sqlx::query(sql), args).fetch_all(pool).await?;
                rows.iter().map(decode_sqlite_row).collect()
            }
        }
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        tracing::trace!(sql = sql, "execute");
        let affected = match self {
            DatabaseConnection::MySql(pool) => {
                bind_args!(sqlx::query(sql), args).execute(pool).await?.rows_affected()
            }
            DatabaseConnection::Sqlite(pool) => {
                bind_args!(sqlx::query(sql), args).execute(pool).await?.rows_affected()
            }
        };
        Ok(affected)
    }

    async fn begin(&self) -> Result<Box<dyn SqlTransaction>> {
        let inner = match self {
            DatabaseConnection::MySql(pool) => TransactionInner::MySql(
                pool.begin()
                    .await
                    .map_err(|e| Error::Transaction(format!("Failed to begin transaction: {}", e)))?,
            ),
            DatabaseConnection::Sqlite(pool) => TransactionInner::Sqlite(
                pool.begin()
                    .await
                    .map_err(|e| Error::Transaction(format!("Failed to begin transaction: {}", e)))?,
            ),
        };

        Ok(Box::new(ConnectionTransaction { inner: Some(inner) }))
    }
}

enum TransactionInner {
    MySql(Transaction<'static, MySql>),
    Sqlite(Transaction<'static, Sqlite>),
}

/// Transaction held on one pooled connection
pub struct ConnectionTransaction {
    inner: Option<TransactionInner>,
}

impl ConnectionTransaction {
    fn active(&mut self) -> Result<&mut TransactionInner> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::Transaction("Transaction already finished".to_string()))
    }
}

#[async_trait]
impl SqlTransaction for ConnectionTransaction {
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        tracing::trace!(sql = sql, "query (transaction)");
        match self.active()? {
            TransactionInner::MySql(tx) => {
                let rows = bind_args!(sqlx::query(sql), args).fetch_all(&mut **tx).await?;
                rows.iter().map(decode_mysql_row).collect()
            }
            TransactionInner::Sqlite(tx) => {
                let rows = bind_args!(sqlx::query(sql), args).fetch_all(&mut **tx).await?;
                rows.iter().map(decode_sqlite_row).collect()
            }
        }
    }

    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        tracing::trace!(sql = sql, "execute (transaction)");
        let affected = match self.active()? {
            TransactionInner::MySql(tx) => bind_args!(sqlx::query(sql), args)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            TransactionInner::Sqlite(tx) => bind_args!(sqlx::query(sql), args)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn commit(&mut self) -> Result<()> {
        let inner = self
            .inner
            .take()
            .ok_or_else(|| Error::Transaction("Transaction already finished".to_string()))?;

        let result = match inner {
            TransactionInner::MySql(tx) => tx.commit().await,
            TransactionInner::Sqlite(tx) => tx.commit().await,
        };
        result.map_err(|e| Error::Transaction(format!("Commit failed: {}", e)))
    }

    async fn rollback(&mut self) -> Result<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };

        let result = match inner {
            TransactionInner::MySql(tx) => tx.rollback().await,
            TransactionInner::Sqlite(tx) => tx.rollback().await,
        };
        result.map_err(|e| Error::Transaction(format!("Rollback failed: {}", e)))
    }
}

fn decode_sqlite_row(row: &SqliteRow) -> Result<SqlRow> {
    let mut decoded = SqlRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                    SqlValue::Int(row.try_get_unchecked::<i64, _>(i)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" => SqlValue::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(i)?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        decoded.push(column.name(), value);
    }

    Ok(decoded)
}

fn decode_mysql_row(row: &MySqlRow) -> Result<SqlRow> {
    let mut decoded = SqlRow::new();

    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                name if name.ends_with("UNSIGNED") && !name.starts_with("DECIMAL") => {
                    SqlValue::from(row.try_get_unchecked::<u64, _>(i)?)
                }
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" | "BOOLEAN" => {
                    SqlValue::Int(row.try_get_unchecked::<i64, _>(i)?)
                }
                "FLOAT" | "DOUBLE" => SqlValue::Float(row.try_get_unchecked::<f64, _>(i)?),
                "DATETIME" | "TIMESTAMP" => {
                    let v = row.try_get_unchecked::<chrono::NaiveDateTime, _>(i)?;
                    SqlValue::Text(v.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                }
                "DATE" => {
                    let v = row.try_get_unchecked::<chrono::NaiveDate, _>(i)?;
                    SqlValue::Text(v.format("%Y-%m-%d").to_string())
                }
                "TIME" => {
                    let v = row.try_get_unchecked::<chrono::NaiveTime, _>(i)?;
                    SqlValue::Text(v.format("%H:%M:%S%.f").to_string())
                }
                "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(i)?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        decoded.push(column.name(), value);
    }

    Ok(decoded)
}
