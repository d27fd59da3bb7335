//! Synchronization engine
//!
//! Drives one entity type through analyze, validate, back up, apply and
//! verify. Business outcomes (validation failures, apply errors) end up in
//! the returned [`SyncResult`]; only commit/rollback failures escape as
//! errors.

use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::backup::{BackupManager, BackupType};
use crate::db::executor::{Deadline, SqlExecutor, SqlTransaction};
use crate::error::{Error, Result};
use crate::schema::analyzer::{RiskLevel, SchemaAnalysisReport, SchemaAnalyzer};
use crate::schema::ddl::{DdlPlan, DdlRenderer};
use crate::schema::difference::{DifferenceAction, DifferenceSet, SchemaDifference};
use crate::sync::events::{EventDispatcher, SYNC_COMPLETED, SYNC_FAILED, SYNC_STARTED};
use crate::sync::lock::EntityLocks;
use crate::sync::options::{SyncOptions, SyncStrategy};
use crate::sync::result::{SyncResult, SyncState, SyncStatus};

pub struct SynchronizationEngine {
    analyzer: Arc<SchemaAnalyzer>,
    backups: Arc<BackupManager>,
    executor: Arc<dyn SqlExecutor>,
    renderer: DdlRenderer,
    events: Option<Arc<dyn EventDispatcher>>,
    locks: EntityLocks,
    max_concurrency: usize,
}

impl SynchronizationEngine {
    pub fn new(
        analyzer: Arc<SchemaAnalyzer>,
        backups: Arc<BackupManager>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        let renderer = DdlRenderer::new(executor.dialect());
        Self {
            analyzer,
            backups,
            executor,
            renderer,
            events: None,
            locks: EntityLocks::new(),
            max_concurrency: 1,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Number of entity types `sync_all` works on at once
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn analyzer(&self) -> &Arc<SchemaAnalyzer> {
        &self.analyzer
    }

    /// Synchronize one entity type
    pub async fn sync(&self, entity_type_code: &str, options: &SyncOptions) -> Result<SyncResult> {
        let started = Instant::now();
        let mut result = SyncResult::new(entity_type_code);

        self.dispatch(
            SYNC_STARTED,
            json!({
                "entity_type_code": entity_type_code,
                "strategy": options.strategy.to_string(),
                "dry_run": options.dry_run,
            }),
        );

        let deadline = Deadline::after(options.timeout);
        if let Err(e) = self
            .run(entity_type_code, options, deadline, &mut result, started)
            .await
        {
            if e.is_fatal() {
                tracing::error!(entity_type = entity_type_code, error = %e, "Schema sync aborted");
                self.dispatch(
                    SYNC_FAILED,
                    json!({ "entity_type_code": entity_type_code, "errors": [e.to_string()] }),
                );
                return Err(e);
            }
            tracing::error!(entity_type = entity_type_code, error = %e, "Schema sync failed");
            result.fail(e.to_string(), started);
        }

        if result.success {
            self.dispatch(
                SYNC_COMPLETED,
                json!({
                    "entity_type_code": entity_type_code,
                    "status": result.status.as_str(),
                    "applied_changes": result.applied_changes.len(),
                    "backup_id": result.backup_id,
                    "execution_time_ms": result.execution_time.as_millis() as u64,
                }),
            );
        } else {
            self.dispatch(
                SYNC_FAILED,
                json!({
                    "entity_type_code": entity_type_code,
                    "status": result.status.as_str(),
                    "errors": result.errors,
                }),
            );
        }

        Ok(result)
    }

    async fn run(
        &self,
        code: &str,
        options: &SyncOptions,
        deadline: Deadline,
        result: &mut SyncResult,
        started: Instant,
    ) -> Result<()> {
        // held from analysis through verification
        let _guard = deadline
            .run("Waiting for the entity type lock", async {
                Ok(self.locks.acquire(code).await)
            })
            .await?;

        result.enter(SyncState::Analyzing);
        let report = deadline.run("Schema analysis", self.analyzer.analyze(code)).await?;
        result.set_metadata("risk_score", report.risk_score);
        result.set_metadata("risk_level", serde_json::to_value(report.risk_level)?);
        result.set_metadata("difference_count", report.differences.count());
        if !report.notices.is_empty() {
            let notices: Vec<String> = report.notices.iter().map(ToString::to_string).collect();
            result.set_metadata("notices", notices);
        }

        if report.differences.is_empty() {
            result.enter(SyncState::Completed);
            result.finish(SyncStatus::InSync, started);
            return Ok(());
        }

        if !options.skip_validation {
            result.enter(SyncState::Validating);
            let violations = validate(&report, options);
            if !violations.is_empty() {
                tracing::warn!(entity_type = code, violations = ?violations, "Sync rejected by validation");
                result.errors.extend(violations);
                result.finish(SyncStatus::ValidationFailed, started);
                return Ok(());
            }
        }

        let mut applicable = match options.strategy {
            SyncStrategy::Additive => report
                .differences
                .filtered(|d| d.action() == DifferenceAction::Add),
            SyncStrategy::Full => report.differences.clone(),
        };

        if applicable
            .iter()
            .any(|d| d.metadata_str("table_role") == Some("entity"))
        {
            let follow_up = self.analyzer.plan_after_entity_table(code).await?;
            tracing::debug!(
                entity_type = code,
                follow_up = follow_up.count(),
                "Planned changes behind the missing entity table"
            );
            for difference in &follow_up {
                applicable.push(difference.clone())?;
            }
        }

        if applicable.is_empty() {
            result.enter(SyncState::Completed);
            result.finish(SyncStatus::NoApplicableChanges, started);
            return Ok(());
        }

        if options.dry_run {
            result.enter(SyncState::DryRun);
            result.set_metadata("would_apply", applicable.descriptions());
            result.set_metadata("preview_sql", self.preview_statements(&applicable));
            result.finish(SyncStatus::DryRun, started);
            return Ok(());
        }

        if options.auto_backup && report.requires_backup() {
            result.enter(SyncState::BackingUp);
            let backup = deadline
                .run("Backup", self.backups.create_backup(code, BackupType::Full))
                .await?;
            result.backup_id = Some(backup.id);
        }

        result.enter(SyncState::Applying);
        let applied = self.apply(code, &applicable, deadline).await;
        // MySQL commits DDL implicitly, so the cache is stale either way
        self.analyzer.invalidate(code);
        result.applied_changes = applied?;

        result.enter(SyncState::Verifying);
        let after = match deadline.run("Verification", self.analyzer.analyze(code)).await {
            Ok(after) => after,
            Err(e) => {
                self.analyzer.invalidate(code);
                return Err(e);
            }
        };
        if after.differences.is_empty() {
            result.set_metadata("verification", "passed");
        } else {
            result.set_metadata("verification", "failed");
            result.set_metadata("remaining_differences", after.differences.descriptions());
            result.errors.push(format!(
                "Verification found {} remaining difference(s)",
                after.differences.count()
            ));
        }

        result.enter(SyncState::Completed);
        result.finish(SyncStatus::Completed, started);
        tracing::info!(
            entity_type = code,
            applied = result.applied_changes.len(),
            "Schema sync completed"
        );
        Ok(())
    }

    /// Apply every difference in one transaction; roll back on any failure
    async fn apply(
        &self,
        code: &str,
        differences: &DifferenceSet,
        deadline: Deadline,
    ) -> Result<Vec<String>> {
        let mut tx = deadline
            .run("Schema synchronization", self.executor.begin())
            .await?;

        let outcome = deadline
            .run(
                "Schema synchronization",
                self.apply_all(tx.as_mut(), differences),
            )
            .await;

        match outcome {
            Ok(applied) => {
                tx.commit().await?;
                Ok(applied)
            }
            Err(e) => {
                tracing::warn!(entity_type = code, error = %e, "Rolling back schema changes");
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    async fn apply_all(
        &self,
        tx: &mut dyn SqlTransaction,
        differences: &DifferenceSet,
    ) -> Result<Vec<String>> {
        let mut applied = Vec::with_capacity(differences.count());
        for difference in differences {
            self.apply_difference(tx, difference).await?;
            applied.push(difference.description().to_string());
        }
        Ok(applied)
    }

    async fn apply_difference(
        &self,
        tx: &mut dyn SqlTransaction,
        difference: &SchemaDifference,
    ) -> Result<()> {
        if difference.is_destructive() {
            return Err(Error::Synchronization(format!(
                "Dropping structures is not supported; remove it manually: {}",
                difference.description()
            )));
        }

        match self.renderer.forward(difference) {
            DdlPlan::Statements(statements) => {
                for statement in &statements {
                    tracing::debug!(sql = %statement, "Applying schema change");
                    tx.execute(statement, &[]).await?;
                }
                Ok(())
            }
            DdlPlan::Manual(note) => Err(Error::Synchronization(format!(
                "Manual migration required: {}",
                note
            ))),
        }
    }

    fn preview_statements(&self, differences: &DifferenceSet) -> Vec<String> {
        differences
            .iter()
            .flat_map(|d| match self.renderer.forward(d) {
                DdlPlan::Statements(statements) => statements,
                DdlPlan::Manual(note) => vec![format!("-- MANUAL: {}", note)],
            })
            .collect()
    }

    /// Synchronize every registered entity type.
    ///
    /// Each entity type gets its own result; a fatal error in one is recorded
    /// as a failed result and never stops the others.
    pub async fn sync_all(&self, options: &SyncOptions) -> IndexMap<String, SyncResult> {
        let codes: Vec<String> = self
            .analyzer
            .registry()
            .get_all_entity_types()
            .into_iter()
            .map(|e| e.entity_type_code)
            .collect();

        stream::iter(codes)
            .map(|code| async move {
                let result = match self.sync(&code, options).await {
                    Ok(result) => result,
                    Err(e) => {
                        let mut result = SyncResult::new(&code);
                        result.set_metadata("fatal", true);
                        result.fail(e.to_string(), Instant::now());
                        result
                    }
                };
                (code, result)
            })
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    fn dispatch(&self, event: &str, payload: Value) {
        if let Some(events) = &self.events {
            events.dispatch(event, &payload);
        }
    }
}

/// Policy checks; returns one message per violated rule
pub fn validate(report: &SchemaAnalysisReport, options: &SyncOptions) -> Vec<String> {
    let mut violations = Vec::new();
    let destructive = report.differences.has_destructive_differences();

    if destructive && !options.force {
        violations.push(
            "Destructive changes detected; use force to apply them".to_string(),
        );
    }
    if report.risk_level == RiskLevel::Dangerous && !options.force {
        violations.push(format!(
            "Risk score {} is dangerous; use force to proceed",
            report.risk_score
        ));
    }
    if options.strategy == SyncStrategy::Additive && destructive {
        violations.push("Additive strategy cannot apply DROP differences".to_string());
    }

    violations
}
