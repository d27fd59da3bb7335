//! Schema comparison
//!
//! Compares an entity type's configuration with its introspected physical
//! schema. The phases (structure, value types, constraints, indexes,
//! orphans) are independent and accumulate into one list of differences.

use serde_json::Value;

use crate::config::AnalyzerConfig;
use crate::schema::difference::{DifferenceAction, DifferenceType, SchemaDifference, Severity};
use crate::schema::types::{
    AttributeConfig, BackendType, DatabaseSchema, EntityTypeConfig, TableSchema, VALUE_TABLE_COLUMNS,
};
use crate::utils::naming;

/// Index prefix required by searchable attributes
pub const ATTRIBUTE_VALUE_INDEX: [&str; 2] = ["attribute_id", "value"];

/// Index prefix required by filterable attributes
pub const ENTITY_ATTRIBUTE_INDEX: [&str; 2] = ["entity_id", "attribute_id"];

/// Index name pattern for generated indexes
pub const INDEX_NAME_PATTERN: &str = "idx_{table}_{columns}";

/// Name for a generated index on `table(columns)`
pub fn index_name(table: &str, columns: &[&str]) -> String {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    naming::truncate_identifier(
        &naming::get_index_name(INDEX_NAME_PATTERN, table, &columns),
        64,
    )
}

/// Configuration-vs-database comparator
pub struct SchemaComparator<'a> {
    config: &'a AnalyzerConfig,
}

impl<'a> SchemaComparator<'a> {
    pub fn new(config: &'a AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Run every comparison phase and return differences in phase order
    pub fn compare(
        &self,
        entity: &EntityTypeConfig,
        schema: &DatabaseSchema,
    ) -> Vec<SchemaDifference> {
        let code = entity.entity_type_code.as_str();

        if !schema.has_table(&entity.entity_table) {
            // nothing else can be checked meaningfully
            return vec![SchemaDifference::new(
                code,
                DifferenceType::MissingTable,
                Severity::Critical,
                DifferenceAction::Add,
                format!("Entity table '{}' does not exist", entity.entity_table),
            )
            .with_table(&entity.entity_table)
            .with_metadata("table_role", "entity")];
        }

        let mut differences = Vec::new();
        differences.extend(self.compare_structure(entity, schema));
        differences.extend(self.compare_types(entity, schema));
        differences.extend(self.compare_constraints(entity, schema));
        differences.extend(self.compare_indexes(entity, schema));
        differences.extend(self.find_orphans(entity, schema));

        tracing::debug!(
            entity_type = code,
            differences = differences.len(),
            "Compared configuration with database schema"
        );

        differences
    }

    /// Existing value tables of the backend types in use
    fn used_value_tables<'s>(
        &self,
        entity: &'s EntityTypeConfig,
        schema: &'s DatabaseSchema,
    ) -> Vec<(BackendType, &'s TableSchema)> {
        entity
            .used_backend_types()
            .into_iter()
            .filter_map(|backend| {
                schema
                    .table(&entity.value_table(backend))
                    .map(|table| (backend, table))
            })
            .collect()
    }

    fn compare_structure(
        &self,
        entity: &EntityTypeConfig,
        schema: &DatabaseSchema,
    ) -> Vec<SchemaDifference> {
        let code = entity.entity_type_code.as_str();
        let mut differences = Vec::new();

        for backend in entity.used_backend_types() {
            let table_name = entity.value_table(backend);
            let attributes = attribute_codes(entity, backend, |_| true);

            let Some(table) = schema.table(&table_name) else {
                differences.push(
                    SchemaDifference::new(
                        code,
                        DifferenceType::MissingTable,
                        Severity::Critical,
                        DifferenceAction::Add,
                        format!(
                            "Value table '{}' for backend type '{}' does not exist",
                            table_name, backend
                        ),
                    )
                    .with_table(&table_name)
                    .with_metadata("table_role", "value")
                    .with_metadata("backend_type", backend.as_str())
                    .with_metadata("attribute_codes", attributes)
                    .with_metadata("indexes", required_indexes(entity, backend)),
                );
                continue;
            };

            for column in VALUE_TABLE_COLUMNS {
                if table.column(column).is_none() {
                    differences.push(
                        SchemaDifference::new(
                            code,
                            DifferenceType::MissingColumn,
                            Severity::Critical,
                            DifferenceAction::Add,
                            format!("Column '{}' is missing from '{}'", column, table_name),
                        )
                        .with_table(&table_name)
                        .with_column(column)
                        .with_metadata("backend_type", backend.as_str())
                        .with_metadata("attribute_codes", attributes.clone()),
                    );
                }
            }
        }

        differences
    }

    fn compare_types(
        &self,
        entity: &EntityTypeConfig,
        schema: &DatabaseSchema,
    ) -> Vec<SchemaDifference> {
        let code = entity.entity_type_code.as_str();

        self.used_value_tables(entity, schema)
            .into_iter()
            .filter_map(|(backend, table)| {
                let column = table.column("value")?;
                if backend.accepts(&column.data_type) {
                    return None;
                }

                Some(
                    SchemaDifference::new(
                        code,
                        DifferenceType::TypeMismatch,
                        Severity::High,
                        DifferenceAction::Modify,
                        format!(
                            "Column '{}.value' has type {} but backend type '{}' expects one of {}",
                            table.name,
                            column.data_type,
                            backend,
                            backend.compatible_types().join(", ")
                        ),
                    )
                    .with_table(&table.name)
                    .with_column("value")
                    .with_metadata("backend_type", backend.as_str())
                    .with_metadata("expected_type", backend.column_type())
                    .with_metadata("actual_type", column.data_type.as_str())
                    .with_metadata(
                        "attribute_codes",
                        attribute_codes(entity, backend, |_| true),
                    ),
                )
            })
            .collect()
    }

    fn compare_constraints(
        &self,
        entity: &EntityTypeConfig,
        schema: &DatabaseSchema,
    ) -> Vec<SchemaDifference> {
        let code = entity.entity_type_code.as_str();
        let mut differences = Vec::new();

        for (backend, table) in self.used_value_tables(entity, schema) {
            for column_name in VALUE_TABLE_COLUMNS.iter().filter(|c| **c != "value") {
                let Some(column) = table.column(column_name) else {
                    continue;
                };
                if column.nullable {
                    differences.push(
                        SchemaDifference::new(
                            code,
                            DifferenceType::ConstraintMismatch,
                            Severity::Medium,
                            DifferenceAction::Modify,
                            format!(
                                "Column '{}.{}' allows NULL but must be NOT NULL",
                                table.name, column_name
                            ),
                        )
                        .with_table(&table.name)
                        .with_column(column_name)
                        .with_metadata("expected_nullable", false)
                        .with_metadata("actual_nullable", true),
                    );
                }
            }

            // required-ness is enforced by the application, so this is informational
            let required = attribute_codes(entity, backend, |a| a.required);
            let value_nullable = table.column("value").map_or(false, |c| c.nullable);
            if value_nullable && !required.is_empty() {
                differences.push(
                    SchemaDifference::new(
                        code,
                        DifferenceType::ConstraintMismatch,
                        Severity::Info,
                        DifferenceAction::Modify,
                        format!(
                            "Required attributes [{}] are stored in '{}.value', which allows NULL",
                            required.join(", "),
                            table.name
                        ),
                    )
                    .with_table(&table.name)
                    .with_column("value")
                    .with_metadata("expected_nullable", false)
                    .with_metadata("actual_nullable", true)
                    .with_metadata("attribute_codes", required),
                );
            }
        }

        differences
    }

    fn compare_indexes(
        &self,
        entity: &EntityTypeConfig,
        schema: &DatabaseSchema,
    ) -> Vec<SchemaDifference> {
        let code = entity.entity_type_code.as_str();
        let mut differences = Vec::new();

        for (backend, table) in self.used_value_tables(entity, schema) {
            let checks = [
                (
                    &ATTRIBUTE_VALUE_INDEX,
                    attribute_codes(entity, backend, |a| a.searchable),
                    Severity::Medium,
                    "searchable",
                ),
                (
                    &ENTITY_ATTRIBUTE_INDEX,
                    attribute_codes(entity, backend, |a| a.filterable),
                    Severity::Low,
                    "filterable",
                ),
            ];

            for (columns, attributes, severity, purpose) in checks {
                if attributes.is_empty() || table.has_index_prefix(columns) {
                    continue;
                }

                differences.push(
                    SchemaDifference::new(
                        code,
                        DifferenceType::MissingIndex,
                        severity,
                        DifferenceAction::Add,
                        format!(
                            "Index on '{}' ({}) is missing for {} attributes [{}]",
                            table.name,
                            columns.join(", "),
                            purpose,
                            attributes.join(", ")
                        ),
                    )
                    .with_table(&table.name)
                    .with_metadata("backend_type", backend.as_str())
                    .with_metadata("index_name", index_name(&table.name, columns))
                    .with_metadata("index_columns", columns.to_vec())
                    .with_metadata("attribute_codes", attributes),
                );
            }
        }

        differences
    }

    fn find_orphans(
        &self,
        entity: &EntityTypeConfig,
        schema: &DatabaseSchema,
    ) -> Vec<SchemaDifference> {
        let code = entity.entity_type_code.as_str();
        let used = entity.used_backend_types();
        let mut differences = Vec::new();

        if self.config.report_orphaned_tables {
            for backend in BackendType::ALL.into_iter().filter(|b| !used.contains(b)) {
                let table_name = entity.value_table(backend);
                if schema.has_table(&table_name) {
                    differences.push(
                        SchemaDifference::new(
                            code,
                            DifferenceType::OrphanedTable,
                            Severity::Low,
                            DifferenceAction::Drop,
                            format!(
                                "Value table '{}' exists but no attribute uses backend type '{}'",
                                table_name, backend
                            ),
                        )
                        .with_table(&table_name)
                        .with_metadata("backend_type", backend.as_str()),
                    );
                }
            }
        }

        if self.config.report_orphaned_columns {
            for (backend, table) in self.used_value_tables(entity, schema) {
                for column in table.columns.keys() {
                    let known = VALUE_TABLE_COLUMNS.contains(&column.as_str())
                        || self
                            .config
                            .allowed_extra_columns
                            .iter()
                            .any(|c| c.eq_ignore_ascii_case(column));
                    if known {
                        continue;
                    }

                    differences.push(
                        SchemaDifference::new(
                            code,
                            DifferenceType::OrphanedColumn,
                            Severity::Low,
                            DifferenceAction::Drop,
                            format!("Column '{}.{}' is not part of the value table layout", table.name, column),
                        )
                        .with_table(&table.name)
                        .with_column(column)
                        .with_metadata("backend_type", backend.as_str()),
                    );
                }
            }
        }

        differences
    }
}

/// Codes of the attributes on `backend` matching `filter`
fn attribute_codes<F>(entity: &EntityTypeConfig, backend: BackendType, filter: F) -> Vec<String>
where
    F: Fn(&AttributeConfig) -> bool,
{
    entity
        .attributes_with_backend(backend)
        .filter(|(_, a)| filter(*a))
        .map(|(code, _)| code.clone())
        .collect()
}

/// Index column lists a new value table needs for the configured attributes
fn required_indexes(entity: &EntityTypeConfig, backend: BackendType) -> Value {
    let mut indexes = Vec::new();
    if entity.attributes_with_backend(backend).any(|(_, a)| a.searchable) {
        indexes.push(Value::from(ATTRIBUTE_VALUE_INDEX.to_vec()));
    }
    if entity.attributes_with_backend(backend).any(|(_, a)| a.filterable) {
        indexes.push(Value::from(ENTITY_ATTRIBUTE_INDEX.to_vec()));
    }
    Value::Array(indexes)
}
