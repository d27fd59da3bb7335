//! Schema model, analysis and migration generation

pub mod analyzer;
pub mod comparator;
pub mod ddl;
pub mod difference;
pub mod generator;
pub mod introspect;
pub mod types;

pub use analyzer::{AnalysisStatus, RiskLevel, SchemaAnalysisReport, SchemaAnalyzer};
pub use difference::{DifferenceAction, DifferenceSet, DifferenceType, SchemaDifference, Severity};
pub use generator::{Direction, GenerateOptions, Migration, MigrationGenerator, MigrationStep};
pub use types::{
    AttributeConfig, BackendType, ColumnInfo, DatabaseSchema, EntityTypeConfig, IndexInfo,
    TableSchema,
};
