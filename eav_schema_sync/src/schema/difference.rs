//! Schema differences
//!
//! A [`SchemaDifference`] is one discrepancy between the configured and the
//! physical schema of an entity type; a [`DifferenceSet`] collects all of
//! them for one entity type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Free-form difference details (table, column, expected/actual type, ...)
pub type Metadata = BTreeMap<String, Value>;

/// Upper bound of any aggregated risk score
pub const MAX_RISK_SCORE: u32 = 100;

/// Kind of discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifferenceType {
    MissingTable,
    MissingColumn,
    MissingIndex,
    TypeMismatch,
    ConstraintMismatch,
    OrphanedTable,
    OrphanedColumn,
}

impl DifferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifferenceType::MissingTable => "MISSING_TABLE",
            DifferenceType::MissingColumn => "MISSING_COLUMN",
            DifferenceType::MissingIndex => "MISSING_INDEX",
            DifferenceType::TypeMismatch => "TYPE_MISMATCH",
            DifferenceType::ConstraintMismatch => "CONSTRAINT_MISMATCH",
            DifferenceType::OrphanedTable => "ORPHANED_TABLE",
            DifferenceType::OrphanedColumn => "ORPHANED_COLUMN",
        }
    }
}

impl fmt::Display for DifferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity, ordered from least to most dangerous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Base risk contributed by one difference of this severity
    pub fn base_score(&self) -> u32 {
        match self {
            Severity::Critical => 40,
            Severity::High => 25,
            Severity::Medium => 12,
            Severity::Low => 5,
            Severity::Info => 0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        };
        f.write_str(name)
    }
}

/// What fixing the difference does to the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifferenceAction {
    Add,
    Modify,
    Drop,
}

impl fmt::Display for DifferenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DifferenceAction::Add => "ADD",
            DifferenceAction::Modify => "MODIFY",
            DifferenceAction::Drop => "DROP",
        };
        f.write_str(name)
    }
}

/// One discrepancy between desired and actual schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDifference {
    entity_type_code: String,
    #[serde(rename = "type")]
    kind: DifferenceType,
    severity: Severity,
    action: DifferenceAction,
    description: String,
    metadata: Metadata,
    table_name: Option<String>,
    column_name: Option<String>,
}

impl SchemaDifference {
    pub fn new(
        entity_type_code: &str,
        kind: DifferenceType,
        severity: Severity,
        action: DifferenceAction,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entity_type_code: entity_type_code.to_string(),
            kind,
            severity,
            action,
            description: description.into(),
            metadata: Metadata::new(),
            table_name: None,
            column_name: None,
        }
    }

    /// Set the affected table (also recorded in metadata)
    pub fn with_table(mut self, table: &str) -> Self {
        self.table_name = Some(table.to_string());
        self.metadata
            .insert("table_name".to_string(), Value::from(table));
        self
    }

    /// Set the affected column (also recorded in metadata)
    pub fn with_column(mut self, column: &str) -> Self {
        self.column_name = Some(column.to_string());
        self.metadata
            .insert("column_name".to_string(), Value::from(column));
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn entity_type_code(&self) -> &str {
        &self.entity_type_code
    }

    pub fn kind(&self) -> DifferenceType {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn action(&self) -> DifferenceAction {
        self.action
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    pub fn column_name(&self) -> Option<&str> {
        self.column_name.as_deref()
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// A string-list metadata entry; empty when absent
    pub fn metadata_strings(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Severity-weighted risk of this difference
    pub fn risk_score(&self) -> u32 {
        self.severity.base_score()
    }

    pub fn is_destructive(&self) -> bool {
        self.action == DifferenceAction::Drop
    }
}

impl fmt::Display for SchemaDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.severity, self.action, self.kind, self.description
        )
    }
}

/// Ordered differences of a single entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferenceSet {
    entity_type_code: String,
    differences: Vec<SchemaDifference>,
}

impl DifferenceSet {
    pub fn new(entity_type_code: &str) -> Self {
        Self {
            entity_type_code: entity_type_code.to_string(),
            differences: Vec::new(),
        }
    }

    /// Build a set, rejecting differences of another entity type
    pub fn from_differences(
        entity_type_code: &str,
        differences: Vec<SchemaDifference>,
    ) -> Result<Self> {
        let mut set = Self::new(entity_type_code);
        for difference in differences {
            set.push(difference)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, difference: SchemaDifference) -> Result<()> {
        if difference.entity_type_code != self.entity_type_code {
            return Err(Error::Synchronization(format!(
                "Difference for entity type '{}' cannot join the set of '{}'",
                difference.entity_type_code, self.entity_type_code
            )));
        }
        self.differences.push(difference);
        Ok(())
    }

    pub fn entity_type_code(&self) -> &str {
        &self.entity_type_code
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SchemaDifference> {
        self.differences.iter()
    }

    pub fn count(&self) -> usize {
        self.differences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn has_destructive_differences(&self) -> bool {
        self.differences.iter().any(SchemaDifference::is_destructive)
    }

    pub fn differences_by_action(&self, action: DifferenceAction) -> Vec<&SchemaDifference> {
        self.differences
            .iter()
            .filter(|d| d.action == action)
            .collect()
    }

    pub fn has_severity_at_least(&self, severity: Severity) -> bool {
        self.differences.iter().any(|d| d.severity >= severity)
    }

    /// Sum of member scores, capped at [`MAX_RISK_SCORE`]
    pub fn total_risk_score(&self) -> u32 {
        self.differences
            .iter()
            .map(SchemaDifference::risk_score)
            .sum::<u32>()
            .min(MAX_RISK_SCORE)
    }

    /// Keep the differences matching `predicate`, preserving order
    pub fn filtered<F>(&self, predicate: F) -> DifferenceSet
    where
        F: Fn(&SchemaDifference) -> bool,
    {
        DifferenceSet {
            entity_type_code: self.entity_type_code.clone(),
            differences: self
                .differences
                .iter()
                .filter(|d| predicate(d))
                .cloned()
                .collect(),
        }
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.differences.iter().map(ToString::to_string).collect()
    }
}

impl<'a> IntoIterator for &'a DifferenceSet {
    type Item = &'a SchemaDifference;
    type IntoIter = std::slice::Iter<'a, SchemaDifference>;

    fn into_iter(self) -> Self::IntoIter {
        self.differences.iter()
    }
}
