//! Type definitions for configured (desired) and physical (actual) EAV schema

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Canonical columns every value table must carry
pub const VALUE_TABLE_COLUMNS: [&str; 4] = ["value_id", "attribute_id", "entity_id", "value"];

/// Physical storage category of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Varchar,
    Int,
    Decimal,
    Datetime,
    Text,
}

impl BackendType {
    pub const ALL: [BackendType; 5] = [
        BackendType::Varchar,
        BackendType::Int,
        BackendType::Decimal,
        BackendType::Datetime,
        BackendType::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Varchar => "varchar",
            BackendType::Int => "int",
            BackendType::Decimal => "decimal",
            BackendType::Datetime => "datetime",
            BackendType::Text => "text",
        }
    }

    /// SQL type of the `value` column in a newly created value table
    pub fn column_type(&self) -> &'static str {
        match self {
            BackendType::Varchar => "VARCHAR(255)",
            BackendType::Int => "INT",
            BackendType::Decimal => "DECIMAL(12,4)",
            BackendType::Datetime => "DATETIME",
            BackendType::Text => "TEXT",
        }
    }

    /// Physical base types accepted for the `value` column
    pub fn compatible_types(&self) -> &'static [&'static str] {
        match self {
            BackendType::Varchar => &["VARCHAR", "CHAR", "NVARCHAR"],
            BackendType::Int => &["INT", "INTEGER", "BIGINT", "SMALLINT", "MEDIUMINT", "TINYINT"],
            BackendType::Decimal => &["DECIMAL", "NUMERIC", "FLOAT", "DOUBLE", "REAL"],
            BackendType::Datetime => &["DATETIME", "TIMESTAMP"],
            BackendType::Text => &["TEXT", "MEDIUMTEXT", "LONGTEXT", "TINYTEXT"],
        }
    }

    pub fn accepts(&self, physical_type: &str) -> bool {
        let base = base_type(physical_type);
        self.compatible_types().iter().any(|t| *t == base)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BackendType::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Configuration(format!("Invalid backend type: {}", s)))
    }
}

/// Upper-cased type name without length, precision or modifiers:
/// `varchar(255)` → `VARCHAR`, `int(10) unsigned` → `INT`
pub fn base_type(physical_type: &str) -> String {
    physical_type
        .split(|c: char| c == '(' || c.is_whitespace())
        .find(|part| !part.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Frontend inputs an attribute may declare
pub const FRONTEND_INPUTS: &[&str] = &[
    "text",
    "textarea",
    "select",
    "multiselect",
    "boolean",
    "date",
    "datetime",
    "price",
    "weight",
    "media_image",
    "gallery",
    "hidden",
];

/// Desired configuration of one attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub backend_type: BackendType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub frontend_input: Option<String>,
}

impl AttributeConfig {
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            required: false,
            unique: false,
            searchable: false,
            filterable: false,
            frontend_input: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    pub fn filterable(mut self, filterable: bool) -> Self {
        self.filterable = filterable;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

/// Desired state of one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeConfig {
    pub entity_type_code: String,
    pub entity_table: String,
    #[serde(default)]
    pub attributes: IndexMap<String, AttributeConfig>,
}

impl EntityTypeConfig {
    pub fn new(entity_type_code: &str, entity_table: &str) -> Self {
        Self {
            entity_type_code: entity_type_code.to_string(),
            entity_table: entity_table.to_string(),
            attributes: IndexMap::new(),
        }
    }

    /// Add an attribute, replacing any previous one with the same code
    pub fn with_attribute(mut self, code: &str, attribute: AttributeConfig) -> Self {
        self.attributes.insert(code.to_string(), attribute);
        self
    }

    /// Name of the value table for a backend type
    pub fn value_table(&self, backend: BackendType) -> String {
        format!("{}_{}", self.entity_table, backend.as_str())
    }

    /// Backend types used by at least one attribute, in canonical order
    pub fn used_backend_types(&self) -> Vec<BackendType> {
        BackendType::ALL
            .into_iter()
            .filter(|b| self.attributes.values().any(|a| a.backend_type == *b))
            .collect()
    }

    pub fn attributes_with_backend(
        &self,
        backend: BackendType,
    ) -> impl Iterator<Item = (&String, &AttributeConfig)> {
        self.attributes
            .iter()
            .filter(move |(_, a)| a.backend_type == backend)
    }

    /// Check identifiers and frontend inputs
    pub fn validate(&self) -> Result<()> {
        if !is_valid_identifier(&self.entity_type_code) {
            return Err(Error::Configuration(format!(
                "Invalid entity type code '{}'",
                self.entity_type_code
            )));
        }

        if !is_valid_identifier(&self.entity_table) {
            return Err(Error::Configuration(format!(
                "Invalid entity table name '{}' for entity type '{}'",
                self.entity_table, self.entity_type_code
            )));
        }

        for (code, attribute) in &self.attributes {
            if let Some(input) = &attribute.frontend_input {
                if !FRONTEND_INPUTS.contains(&input.as_str()) {
                    return Err(Error::Configuration(format!(
                        "Invalid frontend type '{}' for attribute '{}.{}'",
                        input, self.entity_type_code, code
                    )));
                }
            }
        }

        Ok(())
    }
}

/// ASCII letters, digits and underscores, not starting with a digit, at most 64 chars
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Physical schema of the tables belonging to one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub entity_type_code: String,
    pub tables: BTreeMap<String, TableSchema>,
}

impl DatabaseSchema {
    pub fn new(entity_type_code: &str) -> Self {
        Self {
            entity_type_code: entity_type_code.to_string(),
            tables: BTreeMap::new(),
        }
    }

    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

/// Represents a database table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: IndexMap<String, ColumnInfo>,
    pub indexes: BTreeMap<String, IndexInfo>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: IndexMap::new(),
            indexes: BTreeMap::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn add_column(&mut self, column: ColumnInfo) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn add_index(&mut self, index: IndexInfo) {
        self.indexes.insert(index.name.clone(), index);
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) {
        self.foreign_keys.push(fk);
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.get(name)
    }

    /// Whether some index starts with exactly these columns, in this order
    pub fn has_index_prefix(&self, columns: &[&str]) -> bool {
        self.indexes.values().any(|index| index.starts_with(columns))
    }
}

/// Represents a database column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub key: Option<String>,
    pub default: Option<String>,
    pub extra: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
            key: None,
            default: None,
            extra: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn base_type(&self) -> String {
        base_type(&self.data_type)
    }
}

/// Represents an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
    pub index_type: Option<String>,
}

impl IndexInfo {
    pub fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            unique: false,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            index_type: None,
        }
    }

    pub fn starts_with(&self, columns: &[&str]) -> bool {
        self.columns.len() >= columns.len()
            && self
                .columns
                .iter()
                .zip(columns)
                .all(|(have, want)| have.eq_ignore_ascii_case(want))
    }
}

/// Represents a foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}
