//! SQL dialect differences between the supported databases

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::executor::SqlValue;
use crate::error::{Error, Result};

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    /// Resolve a dialect from a configured driver name
    pub fn from_driver(driver: &str) -> Result<Self> {
        match driver.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(Error::Configuration(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }

    /// Quote an identifier (table, column, index name)
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Quote a string literal
    pub fn quote_literal(&self, value: &str) -> String {
        match self {
            Dialect::MySql => format!(
                "'{}'",
                value
                    .replace('\\', "\\\\")
                    .replace('\'', "''")
                    .replace('\n', "\\n")
                    .replace('\r', "\\r")
                    .replace('\0', "\\0")
            ),
            Dialect::Sqlite => format!("'{}'", value.replace('\'', "''")),
        }
    }

    /// Render a value as an SQL literal, `NULL` for nulls.
    ///
    /// Non-finite floats have no literal form and are an error.
    pub fn literal(&self, value: &SqlValue) -> Result<String> {
        match value {
            SqlValue::Null => Ok("NULL".to_string()),
            SqlValue::Int(v) => Ok(v.to_string()),
            SqlValue::Float(v) if v.is_finite() => Ok(v.to_string()),
            SqlValue::Float(v) => Err(Error::Storage(format!(
                "Cannot write {} as an SQL literal",
                v
            ))),
            SqlValue::Text(v) => Ok(self.quote_literal(v)),
        }
    }

    /// Column definition of an auto-incrementing integer primary key
    pub fn auto_increment_primary_key(&self, column: &str) -> String {
        match self {
            Dialect::MySql => format!(
                "{} INT NOT NULL AUTO_INCREMENT PRIMARY KEY",
                self.quote_ident(column)
            ),
            Dialect::Sqlite => format!(
                "{} INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT",
                self.quote_ident(column)
            ),
        }
    }

    pub fn drop_index_sql(&self, table: &str, index: &str) -> String {
        match self {
            Dialect::MySql => format!(
                "DROP INDEX {} ON {}",
                self.quote_ident(index),
                self.quote_ident(table)
            ),
            Dialect::Sqlite => format!("DROP INDEX IF EXISTS {}", self.quote_ident(index)),
        }
    }

    /// Whether string literals treat backslash as an escape character
    pub fn backslash_escapes(&self) -> bool {
        matches!(self, Dialect::MySql)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}
