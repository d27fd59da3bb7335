//! Schema analyzer
//!
//! Loads an entity type's configuration and its (cached) physical schema,
//! compares them and scores the risk of correcting the drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AnalyzerConfig, RiskThresholds};
use crate::db::executor::SqlExecutor;
use crate::error::Result;
use crate::models::registry::EntityTypeRegistry;
use crate::schema::comparator::SchemaComparator;
use crate::schema::difference::{
    DifferenceAction, DifferenceSet, DifferenceType, SchemaDifference, Severity, MAX_RISK_SCORE,
};
use crate::schema::introspect;
use crate::schema::types::{DatabaseSchema, EntityTypeConfig, TableSchema};
use crate::utils::cache::{Cache, TtlCache};

/// Entity tables above this size add [`LARGE_TABLE_RISK`]
pub const LARGE_TABLE_ROWS: u64 = 100_000;
pub const LARGE_TABLE_RISK: u32 = 20;
/// Entity tables above this size add [`MEDIUM_TABLE_RISK`]
pub const MEDIUM_TABLE_ROWS: u64 = 10_000;
pub const MEDIUM_TABLE_RISK: u32 = 10;
pub const PRODUCTION_RISK: u32 = 10;

/// Auto-backup kicks in from this adjusted risk score
pub const BACKUP_RISK_SCORE: u32 = 40;

/// Schema cache shared by analyses, keyed by entity type code
pub type SchemaCache = dyn Cache<String, Arc<DatabaseSchema>>;

/// Qualitative risk of applying a difference set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Dangerous,
}

impl RiskLevel {
    pub fn from_score(score: u32, thresholds: &RiskThresholds) -> Self {
        if score >= thresholds.dangerous {
            RiskLevel::Dangerous
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Overall verdict of an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    InSync,
    DriftDetected,
    NeedsAttention,
    Critical,
}

/// Result of analyzing one entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaAnalysisReport {
    pub entity_type_code: String,
    pub status: AnalysisStatus,
    /// Actionable differences, in comparison order
    pub differences: DifferenceSet,
    /// Informational findings that never require a change
    pub notices: Vec<SchemaDifference>,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    /// Rows in the entity table, when it exists and drift was found
    pub entity_row_count: Option<u64>,
    pub analyzed_at: DateTime<Utc>,
}

impl SchemaAnalysisReport {
    pub fn is_in_sync(&self) -> bool {
        self.differences.is_empty()
    }

    /// Whether a sync should take a backup first
    pub fn requires_backup(&self) -> bool {
        self.risk_score >= BACKUP_RISK_SCORE || self.differences.has_destructive_differences()
    }
}

/// Compares configured entity types against the live database
pub struct SchemaAnalyzer {
    registry: Arc<dyn EntityTypeRegistry>,
    executor: Arc<dyn SqlExecutor>,
    cache: Arc<SchemaCache>,
    config: AnalyzerConfig,
}

impl SchemaAnalyzer {
    /// Create an analyzer with an in-memory TTL cache
    pub fn new(
        registry: Arc<dyn EntityTypeRegistry>,
        executor: Arc<dyn SqlExecutor>,
        config: AnalyzerConfig,
    ) -> Self {
        let cache: Arc<SchemaCache> = Arc::new(TtlCache::new(Duration::from_secs(
            config.cache_ttl_seconds,
        )));
        Self::with_cache(registry, executor, cache, config)
    }

    pub fn with_cache(
        registry: Arc<dyn EntityTypeRegistry>,
        executor: Arc<dyn SqlExecutor>,
        cache: Arc<SchemaCache>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn EntityTypeRegistry> {
        &self.registry
    }

    /// Analyze one entity type
    pub async fn analyze(&self, entity_type_code: &str) -> Result<SchemaAnalysisReport> {
        let entity = self.registry.get_entity_type(entity_type_code)?;
        let schema = self.load_schema(&entity).await?;

        let (notices, actionable): (Vec<_>, Vec<_>) = SchemaComparator::new(&self.config)
            .compare(&entity, &schema)
            .into_iter()
            .partition(|d| d.severity() == Severity::Info);
        let differences = DifferenceSet::from_differences(entity_type_code, actionable)?;

        let entity_row_count = if !differences.is_empty() && schema.has_table(&entity.entity_table) {
            Some(introspect::count_rows(self.executor.as_ref(), &entity.entity_table).await?)
        } else {
            None
        };

        let risk_score = adjusted_risk_score(&differences, entity_row_count, &self.config);
        let risk_level = RiskLevel::from_score(risk_score, &self.config.risk_thresholds);
        let status = determine_status(&differences, risk_score, &self.config.risk_thresholds);
        let recommendations = recommendations(&differences, status, risk_level);

        tracing::info!(
            entity_type = entity_type_code,
            differences = differences.count(),
            notices = notices.len(),
            risk_score,
            ?status,
            "Analyzed entity schema"
        );

        Ok(SchemaAnalysisReport {
            entity_type_code: entity_type_code.to_string(),
            status,
            differences,
            notices,
            risk_score,
            risk_level,
            recommendations,
            entity_row_count,
            analyzed_at: Utc::now(),
        })
    }

    /// Physical schema of an entity type, served from cache while fresh
    pub async fn load_schema(&self, entity: &EntityTypeConfig) -> Result<Arc<DatabaseSchema>> {
        let key = entity.entity_type_code.clone();
        if let Some(schema) = self.cache.get(&key) {
            tracing::trace!(entity_type = %key, "Schema cache hit");
            return Ok(schema);
        }

        let schema = Arc::new(introspect::introspect_entity_schema(self.executor.as_ref(), entity).await?);
        self.cache.set(key, Arc::clone(&schema));
        Ok(schema)
    }

    /// Additive changes that will be needed once the missing entity table
    /// exists, planned from the same schema snapshot the analysis used
    pub async fn plan_after_entity_table(&self, entity_type_code: &str) -> Result<DifferenceSet> {
        let entity = self.registry.get_entity_type(entity_type_code)?;
        let mut schema = DatabaseSchema::clone(&*self.load_schema(&entity).await?);
        schema.add_table(TableSchema::new(&entity.entity_table));

        let planned = SchemaComparator::new(&self.config)
            .compare(&entity, &schema)
            .into_iter()
            .filter(|d| d.action() == DifferenceAction::Add && d.severity() != Severity::Info)
            .collect();
        DifferenceSet::from_differences(entity_type_code, planned)
    }

    /// Drop the cached schema of one entity type
    pub fn invalidate(&self, entity_type_code: &str) {
        self.cache.invalidate(&entity_type_code.to_string());
    }

    /// Drop every cached schema
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Summed difference risk plus environment and table-size modifiers
pub fn adjusted_risk_score(
    differences: &DifferenceSet,
    entity_row_count: Option<u64>,
    config: &AnalyzerConfig,
) -> u32 {
    if differences.is_empty() {
        return 0;
    }

    let mut score = differences.total_risk_score();
    if config.environment.eq_ignore_ascii_case("production") {
        score += PRODUCTION_RISK;
    }
    match entity_row_count {
        Some(rows) if rows > LARGE_TABLE_ROWS => score += LARGE_TABLE_RISK,
        Some(rows) if rows > MEDIUM_TABLE_ROWS => score += MEDIUM_TABLE_RISK,
        _ => {}
    }

    score.min(MAX_RISK_SCORE)
}

pub fn determine_status(
    differences: &DifferenceSet,
    risk_score: u32,
    thresholds: &RiskThresholds,
) -> AnalysisStatus {
    if differences.is_empty() {
        AnalysisStatus::InSync
    } else if differences.has_severity_at_least(Severity::High) || risk_score >= thresholds.high {
        AnalysisStatus::Critical
    } else if differences.has_severity_at_least(Severity::Medium) || risk_score >= thresholds.medium
    {
        AnalysisStatus::NeedsAttention
    } else {
        AnalysisStatus::DriftDetected
    }
}

/// Human-readable next steps; never empty
pub fn recommendations(
    differences: &DifferenceSet,
    status: AnalysisStatus,
    risk_level: RiskLevel,
) -> Vec<String> {
    if differences.is_empty() {
        return vec!["Schema is in sync with the configuration; no action required".to_string()];
    }

    let mut recommendations = Vec::new();

    if status == AnalysisStatus::Critical {
        recommendations.push(
            "Run schema synchronization to create the missing tables, columns and indexes"
                .to_string(),
        );
    }
    if differences.has_destructive_differences() {
        recommendations.push("Create a full backup before applying destructive changes".to_string());
    }
    let manual = differences.iter().any(|d| {
        matches!(
            d.kind(),
            DifferenceType::TypeMismatch | DifferenceType::ConstraintMismatch
        )
    });
    if manual {
        recommendations
            .push("Type and constraint mismatches need a manual migration".to_string());
    }
    if risk_level == RiskLevel::Low && !differences.has_destructive_differences() && !manual {
        recommendations.push("Changes are low risk and safe to auto-sync".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("Review the differences before synchronizing".to_string());
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::difference::DifferenceAction;
    use rstest::rstest;

    fn set(items: &[(DifferenceType, Severity, DifferenceAction)]) -> DifferenceSet {
        let differences = items
            .iter()
            .map(|(kind, severity, action)| {
                SchemaDifference::new("product", *kind, *severity, *action, "test")
            })
            .collect();
        DifferenceSet::from_differences("product", differences).unwrap()
    }

    fn development() -> AnalyzerConfig {
        AnalyzerConfig {
            environment: "development".to_string(),
            ..AnalyzerConfig::default()
        }
    }

    #[rstest]
    #[case(0, RiskLevel::Low)]
    #[case(19, RiskLevel::Low)]
    #[case(20, RiskLevel::Medium)]
    #[case(50, RiskLevel::High)]
    #[case(80, RiskLevel::Dangerous)]
    fn maps_scores_to_levels(#[case] score: u32, #[case] expected: RiskLevel) {
        assert_eq!(RiskLevel::from_score(score, &RiskThresholds::default()), expected);
    }

    #[test]
    fn no_modifiers_without_differences() {
        let empty = DifferenceSet::new("product");
        assert_eq!(
            adjusted_risk_score(&empty, Some(1_000_000), &AnalyzerConfig::default()),
            0
        );
    }

    #[rstest]
    #[case(None, 12)]
    #[case(Some(10_000), 12)]
    #[case(Some(10_001), 22)]
    #[case(Some(100_001), 32)]
    fn row_count_raises_risk(#[case] rows: Option<u64>, #[case] expected: u32) {
        let differences = set(&[(DifferenceType::MissingIndex, Severity::Medium, DifferenceAction::Add)]);
        assert_eq!(adjusted_risk_score(&differences, rows, &development()), expected);
    }

    #[test]
    fn production_risk_is_capped() {
        let differences = set(&[
            (DifferenceType::MissingTable, Severity::Critical, DifferenceAction::Add),
            (DifferenceType::MissingTable, Severity::Critical, DifferenceAction::Add),
            (DifferenceType::MissingTable, Severity::Critical, DifferenceAction::Add),
        ]);
        assert_eq!(
            adjusted_risk_score(&differences, Some(500_000), &AnalyzerConfig::default()),
            MAX_RISK_SCORE
        );
    }

    #[test]
    fn status_follows_worst_severity() {
        let thresholds = RiskThresholds::default();

        let low = set(&[(DifferenceType::MissingIndex, Severity::Low, DifferenceAction::Add)]);
        assert_eq!(determine_status(&low, 5, &thresholds), AnalysisStatus::DriftDetected);
        assert_eq!(determine_status(&low, 25, &thresholds), AnalysisStatus::NeedsAttention);

        let medium = set(&[(DifferenceType::MissingIndex, Severity::Medium, DifferenceAction::Add)]);
        assert_eq!(determine_status(&medium, 12, &thresholds), AnalysisStatus::NeedsAttention);

        let high = set(&[(DifferenceType::TypeMismatch, Severity::High, DifferenceAction::Modify)]);
        assert_eq!(determine_status(&high, 25, &thresholds), AnalysisStatus::Critical);

        assert_eq!(
            determine_status(&DifferenceSet::new("product"), 0, &thresholds),
            AnalysisStatus::InSync
        );
    }

    #[test]
    fn recommends_backup_for_destructive_changes() {
        let differences = set(&[(DifferenceType::OrphanedTable, Severity::Low, DifferenceAction::Drop)]);
        let recommendations =
            recommendations(&differences, AnalysisStatus::DriftDetected, RiskLevel::Low);

        assert_eq!(recommendations.len(), 1);
        assert!(recommendations[0].contains("backup"));
    }

    #[test]
    fn low_risk_additions_are_safe_to_auto_sync() {
        let differences = set(&[(DifferenceType::MissingIndex, Severity::Low, DifferenceAction::Add)]);
        let recommendations =
            recommendations(&differences, AnalysisStatus::DriftDetected, RiskLevel::Low);
        assert_eq!(recommendations, vec!["Changes are low risk and safe to auto-sync"]);

        let in_sync = recommendations_for_empty();
        assert!(in_sync[0].contains("in sync"));
    }

    fn recommendations_for_empty() -> Vec<String> {
        recommendations(&DifferenceSet::new("product"), AnalysisStatus::InSync, RiskLevel::Low)
    }

    #[test]
    fn falls_back_to_review_hint() {
        let differences = set(&[(DifferenceType::MissingIndex, Severity::Medium, DifferenceAction::Add)]);
        let recommendations =
            recommendations(&differences, AnalysisStatus::NeedsAttention, RiskLevel::Medium);
        assert_eq!(recommendations, vec!["Review the differences before synchronizing"]);
    }
}
