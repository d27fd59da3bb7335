//! Synchronization results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Final status of one `sync()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InSync,
    DryRun,
    Completed,
    ValidationFailed,
    Failed,
    NoApplicableChanges,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InSync => "in_sync",
            SyncStatus::DryRun => "dry_run",
            SyncStatus::Completed => "completed",
            SyncStatus::ValidationFailed => "validation_failed",
            SyncStatus::Failed => "failed",
            SyncStatus::NoApplicableChanges => "no_applicable_changes",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine states, recorded in visiting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Analyzing,
    Validating,
    BackingUp,
    Applying,
    Verifying,
    DryRun,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub entity_type_code: String,
    pub success: bool,
    pub status: SyncStatus,
    /// Descriptions of the differences that were applied
    pub applied_changes: Vec<String>,
    pub errors: Vec<String>,
    pub backup_id: Option<String>,
    pub execution_time: Duration,
    pub metadata: BTreeMap<String, Value>,
    pub states: Vec<SyncState>,
}

impl SyncResult {
    pub fn new(entity_type_code: &str) -> Self {
        Self {
            entity_type_code: entity_type_code.to_string(),
            success: false,
            status: SyncStatus::Failed,
            applied_changes: Vec::new(),
            errors: Vec::new(),
            backup_id: None,
            execution_time: Duration::ZERO,
            metadata: BTreeMap::new(),
            states: Vec::new(),
        }
    }

    pub(crate) fn enter(&mut self, state: SyncState) {
        tracing::debug!(entity_type = %self.entity_type_code, ?state, "Sync state");
        self.states.push(state);
    }

    pub(crate) fn finish(&mut self, status: SyncStatus, started: Instant) {
        self.status = status;
        self.success = !matches!(status, SyncStatus::Failed | SyncStatus::ValidationFailed);
        self.execution_time = started.elapsed();
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>, started: Instant) {
        self.errors.push(error.into());
        self.enter(SyncState::Failed);
        self.finish(SyncStatus::Failed, started);
    }

    pub(crate) fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_records_state_and_error() {
        let mut result = SyncResult::new("product");
        result.enter(SyncState::Analyzing);
        result.fail("boom", Instant::now());

        assert!(!result.success);
        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(result.states, vec![SyncState::Analyzing, SyncState::Failed]);
        assert_eq!(result.errors, vec!["boom"]);
    }

    #[test]
    fn statuses_serialize_in_snake_case() {
        assert_eq!(
            serde_json::to_value(SyncStatus::NoApplicableChanges).unwrap(),
            Value::from("no_applicable_changes")
        );
        assert_eq!(SyncStatus::ValidationFailed.to_string(), "validation_failed");
    }
}
