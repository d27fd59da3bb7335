//! SQL backups of entity type tables
//!
//! A backup is a plain SQL script under the backup directory named
//! `{entity}_{schema|data|full}_{timestamp}.sql`. Its first line is a JSON
//! header comment carrying the backup id and metadata.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::BackupConfig;
use crate::db::executor::{Deadline, SqlExecutor, SqlTransaction};
use crate::db::script::split_statements;
use crate::error::{Error, Result};
use crate::models::registry::EntityTypeRegistry;
use crate::schema::introspect::{introspector_for, Introspector};
use crate::schema::types::{is_valid_identifier, BackendType};

const HEADER_PREFIX: &str = "-- schema-sync-backup: ";

static BACKUP_FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<entity>.+)_(?P<kind>schema|data|full)_(?P<ts>\d+)\.sql$")
        .expect("backup file name pattern is valid")
});

/// What a backup contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    SchemaOnly,
    DataOnly,
    Full,
}

impl BackupType {
    /// Tag used in backup file names
    pub fn file_tag(&self) -> &'static str {
        match self {
            BackupType::SchemaOnly => "schema",
            BackupType::DataOnly => "data",
            BackupType::Full => "full",
        }
    }

    fn includes_schema(&self) -> bool {
        matches!(self, BackupType::SchemaOnly | BackupType::Full)
    }

    fn includes_data(&self) -> bool {
        matches!(self, BackupType::DataOnly | BackupType::Full)
    }
}

/// A stored backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub entity_type_code: String,
    pub backup_type: BackupType,
    pub storage_path: PathBuf,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, Value>,
}

/// Header line persisted at the top of every backup file
#[derive(Debug, Serialize, Deserialize)]
struct BackupHeader {
    id: String,
    entity_type_code: String,
    backup_type: BackupType,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Only check that the file looks restorable
    pub verify_only: bool,
    /// Bound on the restore transaction
    pub timeout: Option<Duration>,
}

/// Outcome of a restore or verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub backup_id: String,
    pub success: bool,
    pub verify_only: bool,
    pub statements_executed: usize,
    pub errors: Vec<String>,
    pub execution_time: Duration,
}

impl RestoreResult {
    fn new(backup_id: &str, verify_only: bool) -> Self {
        Self {
            backup_id: backup_id.to_string(),
            success: false,
            verify_only,
            statements_executed: 0,
            errors: Vec::new(),
            execution_time: Duration::ZERO,
        }
    }

    fn fail(mut self, error: impl Into<String>, started: Instant) -> Self {
        self.success = false;
        self.errors.push(error.into());
        self.execution_time = started.elapsed();
        self
    }
}

/// Creates, lists and restores backups
pub struct BackupManager {
    executor: Arc<dyn SqlExecutor>,
    registry: Arc<dyn EntityTypeRegistry>,
    directory: PathBuf,
    /// Backups seen by this manager, so they resolve even if the header is lost
    known: Mutex<HashMap<String, PathBuf>>,
}

impl BackupManager {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        registry: Arc<dyn EntityTypeRegistry>,
        config: &BackupConfig,
    ) -> Self {
        Self {
            executor,
            registry,
            directory: PathBuf::from(&config.directory),
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Back up the entity table and every existing value table
    pub async fn create_backup(
        &self,
        entity_type_code: &str,
        backup_type: BackupType,
    ) -> Result<Backup> {
        // the code becomes part of the file name
        if !is_valid_identifier(entity_type_code) {
            return Err(Error::Configuration(format!(
                "Invalid entity type code for a backup: '{}'",
                entity_type_code
            )));
        }
        let entity = self.registry.get_entity_type(entity_type_code)?;
        let introspector = introspector_for(self.executor.as_ref());

        let mut tables = Vec::new();
        let candidates = std::iter::once(entity.entity_table.clone())
            .chain(BackendType::ALL.into_iter().map(|b| entity.value_table(b)));
        for table in candidates {
            if introspector.table_exists(&table).await? {
                tables.push(table);
            }
        }

        let (body, statement_count) = self
            .render_tables(introspector.as_ref(), &tables, backup_type)
            .await?;

        let created_at = Utc::now();
        let mut metadata = BTreeMap::new();
        metadata.insert("tables".to_string(), Value::from(tables.clone()));
        metadata.insert("statement_count".to_string(), Value::from(statement_count));
        metadata.insert(
            "dialect".to_string(),
            Value::from(self.executor.dialect().to_string()),
        );
        let header = BackupHeader {
            id: Uuid::new_v4().to_string(),
            entity_type_code: entity_type_code.to_string(),
            backup_type,
            created_at,
            metadata,
        };

        fs::create_dir_all(&self.directory).map_err(|e| {
            Error::Storage(format!(
                "Failed to create backup directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;
        let file_name = format!(
            "{}_{}_{}.sql",
            entity_type_code,
            backup_type.file_tag(),
            created_at.format("%Y%m%d%H%M%S%6f")
        );
        let path = self.directory.join(file_name);

        let content = format!("{}{}\n{}", HEADER_PREFIX, serde_json::to_string(&header)?, body);
        if let Err(e) = fs::write(&path, &content) {
            // never leave a truncated backup behind
            let _ = fs::remove_file(&path);
            return Err(Error::Storage(format!(
                "Failed to write backup {}: {}",
                path.display(),
                e
            )));
        }

        self.remember(&header.id, &path);
        tracing::info!(
            entity_type = entity_type_code,
            backup_id = %header.id,
            backup_type = backup_type.file_tag(),
            path = %path.display(),
            tables = tables.len(),
            "Created backup"
        );

        Ok(Backup {
            id: header.id,
            entity_type_code: header.entity_type_code,
            backup_type,
            storage_path: path,
            file_size: content.len() as u64,
            created_at,
            metadata: header.metadata,
        })
    }

    async fn render_tables(
        &self,
        introspector: &dyn Introspector,
        tables: &[String],
        backup_type: BackupType,
    ) -> Result<(String, usize)> {
        let dialect = self.executor.dialect();
        let mut body = String::new();
        let mut count = 0;

        for table in tables {
            let quoted = dialect.quote_ident(table);
            let _ = writeln!(body, "\n-- Table: {}", table);

            if backup_type.includes_schema() {
                let _ = writeln!(body, "DROP TABLE IF EXISTS {};", quoted);
                count += 1;
                for statement in introspector.create_table_statements(table).await? {
                    let _ = writeln!(body, "{};", statement.trim_end().trim_end_matches(';'));
                    count += 1;
                }
            } else {
                let _ = writeln!(body, "DELETE FROM {};", quoted);
                count += 1;
            }

            if backup_type.includes_data() {
                let rows = self
                    .executor
                    .query(&format!("SELECT * FROM {}", quoted), &[])
                    .await
                    .map_err(|e| Error::Storage(format!("Failed to read {}: {}", table, e)))?;
                for row in rows {
                    let columns: Vec<String> =
                        row.columns().map(|(name, _)| dialect.quote_ident(name)).collect();
                    let values = row
                        .columns()
                        .map(|(name, value)| {
                            dialect.literal(value).map_err(|e| {
                                Error::Storage(format!("Failed to back up {}.{}: {}", table, name, e))
                            })
                        })
                        .collect::<Result<Vec<String>>>()?;
                    let _ = writeln!(
                        body,
                        "INSERT INTO {} ({}) VALUES ({});",
                        quoted,
                        columns.join(", "),
                        values.join(", ")
                    );
                    count += 1;
                }
            }
        }

        Ok((body, count))
    }

    /// Every readable backup, newest first, optionally for one entity type
    pub async fn list_backups(&self, entity_type_code: Option<&str>) -> Result<Vec<Backup>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.directory).map_err(|e| {
            Error::Storage(format!(
                "Failed to read backup directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;

        let mut backups: Vec<(String, Backup)> = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            let Some(captures) = BACKUP_FILE_NAME.captures(&file_name) else {
                continue;
            };
            if let Some(code) = entity_type_code {
                if &captures["entity"] != code {
                    continue;
                }
            }
            let timestamp = captures["ts"].to_string();

            match read_backup(&path) {
                Ok(backup) => {
                    self.remember(&backup.id, &path);
                    backups.push((timestamp, backup));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable backup");
                }
            }
        }

        backups.sort_by(|(a, _), (b, _)| b.cmp(a));
        Ok(backups.into_iter().map(|(_, backup)| backup).collect())
    }

    /// Look up a backup by id
    pub async fn get_backup(&self, backup_id: &str) -> Result<Option<Backup>> {
        Ok(self
            .list_backups(None)
            .await?
            .into_iter()
            .find(|b| b.id == backup_id))
    }

    fn remember(&self, backup_id: &str, path: &Path) {
        self.known
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backup_id.to_string(), path.to_path_buf());
    }

    /// Storage path of a backup id
    async fn locate(&self, backup_id: &str) -> Result<Option<PathBuf>> {
        let known = self
            .known
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(backup_id)
            .cloned();
        if known.is_some() {
            return Ok(known);
        }

        Ok(self
            .get_backup(backup_id)
            .await?
            .map(|backup| backup.storage_path))
    }

    /// Verify or restore a backup.
    ///
    /// Failures are reported in the result; only commit/rollback failures
    /// are returned as errors.
    pub async fn restore(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreResult> {
        let started = Instant::now();
        let deadline = Deadline::after(options.timeout);
        let result = RestoreResult::new(backup_id, options.verify_only);

        let path = match deadline.run("Locating the backup", self.locate(backup_id)).await {
            Ok(Some(path)) => path,
            Ok(None) => return Ok(result.fail(format!("Backup not found: {}", backup_id), started)),
            Err(e) => return Ok(result.fail(e.to_string(), started)),
        };

        let content = match verify_file(&path) {
            Ok(content) => content,
            Err(e) => return Ok(result.fail(e, started)),
        };

        if options.verify_only {
            tracing::info!(backup_id, "Backup verified");
            return Ok(RestoreResult {
                success: true,
                execution_time: started.elapsed(),
                ..result
            });
        }

        let statements = split_statements(&content, self.executor.dialect());
        let mut tx = match deadline.run("Backup restore", self.executor.begin()).await {
            Ok(tx) => tx,
            Err(e @ Error::Timeout(_)) => return Ok(result.fail(e.to_string(), started)),
            Err(e) => return Err(e),
        };

        let outcome = deadline
            .run("Backup restore", execute_all(tx.as_mut(), &statements))
            .await;

        match outcome {
            Ok(executed) => {
                tx.commit().await?;
                tracing::info!(
                    backup_id,
                    path = %path.display(),
                    statements = executed,
                    "Backup restored"
                );
                Ok(RestoreResult {
                    success: true,
                    statements_executed: executed,
                    execution_time: started.elapsed(),
                    ..result
                })
            }
            Err(e) => {
                tx.rollback().await?;
                tracing::error!(backup_id, error = %e, "Backup restore rolled back");
                Ok(result.fail(e.to_string(), started))
            }
        }
    }
}

async fn execute_all(tx: &mut dyn SqlTransaction, statements: &[String]) -> Result<usize> {
    for (i, statement) in statements.iter().enumerate() {
        tx.execute(statement, &[]).await.map_err(|e| {
            Error::Storage(format!("Restore failed at statement {}: {}", i + 1, e))
        })?;
    }
    Ok(statements.len())
}

/// Read a backup file and check that it can be restored
fn verify_file(path: &Path) -> std::result::Result<String, String> {
    if !path.exists() {
        return Err(format!("Backup file not found: {}", path.display()));
    }

    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read backup: {}", e))?;
    if content.trim().is_empty() {
        return Err("Backup file is empty".to_string());
    }
    if !content.contains("CREATE TABLE") && !content.contains("INSERT INTO") {
        return Err("Backup file contains no CREATE TABLE or INSERT INTO statements".to_string());
    }

    Ok(content)
}

/// Parse the header line of a backup file
fn read_backup(path: &Path) -> Result<Backup> {
    let content = fs::read_to_string(path)?;
    let header_line = content
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(HEADER_PREFIX))
        .ok_or_else(|| Error::Storage(format!("Missing backup header in {}", path.display())))?;
    let header: BackupHeader = serde_json::from_str(header_line)?;

    Ok(Backup {
        id: header.id,
        entity_type_code: header.entity_type_code,
        backup_type: header.backup_type,
        storage_path: path.to_path_buf(),
        file_size: content.len() as u64,
        created_at: header.created_at,
        metadata: header.metadata,
    })
}
