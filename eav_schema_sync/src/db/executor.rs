//! SQL executor
//!
//! The engine talks to the database only through these traits, so the sqlx
//! backed [`DatabaseConnection`](crate::db::DatabaseConnection) can be swapped
//! for any other implementation.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::db::dialect::Dialect;
use crate::error::{Error, Result};

/// A single bound argument or decoded column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render the value as text; `None` for NULL
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Text(v) => Some(v.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Float(v) => Some(*v as i64),
            SqlValue::Text(v) => v.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

/// Unsigned values beyond `i64::MAX` are kept exactly as text
impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| SqlValue::Text(value.to_string()), SqlValue::Int)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// One result row, columns kept in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    columns: IndexMap<String, SqlValue>,
}

impl SqlRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns.get(name)
    }

    /// Positional access, for statements whose column names vary
    /// (e.g. `SHOW TABLES LIKE` → `Tables_in_<db> (<pattern>)`)
    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get_index(index).map(|(_, value)| value)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(SqlValue::as_text)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(SqlValue::as_i64)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for SqlRow {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        let mut row = SqlRow::new();
        for (name, value) in iter {
            row.push(name, value);
        }
        row
    }
}

/// Statement execution against the live database
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// SQL dialect spoken by this executor
    fn dialect(&self) -> Dialect;

    /// Run a query and decode every row
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Run a statement and return the affected row count
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64>;

    /// Start a transaction on a dedicated connection
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>>;
}

/// An open transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait SqlTransaction: Send {
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>>;

    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64>;

    /// Fails with [`Error::Transaction`](crate::error::Error::Transaction)
    async fn commit(&mut self) -> Result<()>;

    /// Fails with [`Error::Transaction`](crate::error::Error::Transaction)
    async fn rollback(&mut self) -> Result<()>;

    /// Execute multiple SQL statements in order
    async fn execute_batch(&mut self, statements: &[String]) -> Result<usize> {
        for statement in statements {
            self.execute(statement, &[]).await?;
        }

        Ok(statements.len())
    }
}

/// Time budget shared by every phase of one operation
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    limit: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Start a budget of `limit`; `None` never expires
    pub fn after(limit: Option<Duration>) -> Self {
        Self {
            limit,
            expires_at: limit.map(|limit| Instant::now() + limit),
        }
    }

    /// Time left before expiry
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// Await `future` within what is left of the budget, failing with
    /// [`Error::Timeout`] on expiry
    pub async fn run<F, T>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let (Some(at), Some(limit)) = (self.expires_at, self.limit) else {
            return future.await;
        };
        let expired = || Error::Timeout(format!("{} exceeded {:?}", operation, limit));

        // an exhausted budget never starts the next phase
        if Instant::now() >= at {
            return Err(expired());
        }
        tokio::time::timeout_at(at, future)
            .await
            .map_err(|_| expired())?
    }
}
