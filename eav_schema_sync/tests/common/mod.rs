//! Shared fixtures for integration tests: a temporary SQLite database and
//! a fully wired analyzer/backup/engine stack on top of it.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eav_schema_sync::backup::BackupManager;
use eav_schema_sync::config::{AnalyzerConfig, BackupConfig, DatabaseConfig};
use eav_schema_sync::db::{
    DatabaseConnection, Dialect, SqlExecutor, SqlRow, SqlTransaction, SqlValue,
};
use eav_schema_sync::models::StaticRegistry;
use eav_schema_sync::schema::{AttributeConfig, BackendType, EntityTypeConfig, SchemaAnalyzer};
use eav_schema_sync::sync::{EventDispatcher, SynchronizationEngine};
use eav_schema_sync::Result;
use serde_json::Value;
use tempfile::TempDir;

pub struct TestDb {
    pub dir: TempDir,
    pub connection: DatabaseConnection,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eav.db");
        let connection = DatabaseConnection::connect(&DatabaseConfig {
            driver: "sqlite".to_string(),
            url: format!("sqlite://{}?mode=rwc", path.display()),
            pool_size: Some(1),
            timeout_seconds: Some(5),
        })
        .await
        .unwrap();

        Self { dir, connection }
    }

    pub fn executor(&self) -> Arc<dyn SqlExecutor> {
        Arc::new(self.connection.clone())
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    pub async fn exec(&self, sql: &str) {
        self.connection.execute(sql, &[]).await.unwrap();
    }

    pub async fn tables(&self) -> Vec<String> {
        self.connection
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await
            .unwrap()
            .iter()
            .filter_map(|row| row.text("name"))
            .collect()
    }

    pub async fn count(&self, table: &str) -> i64 {
        self.connection
            .query(&format!("SELECT COUNT(*) AS n FROM \"{}\"", table), &[])
            .await
            .unwrap()[0]
            .int("n")
            .unwrap()
    }

    /// Entity table in its canonical shape
    pub async fn create_entity_table(&self, table: &str) {
        self.exec(&format!(
            "CREATE TABLE \"{}\" (entity_id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
             created_at DATETIME NULL, updated_at DATETIME NULL)",
            table
        ))
        .await;
    }

    /// Value table with canonical columns and no indexes
    pub async fn create_value_table(&self, table: &str, value_type: &str) {
        self.exec(&format!(
            "CREATE TABLE \"{}\" (value_id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
             attribute_id INT NOT NULL, entity_id INT NOT NULL, value {} NULL)",
            table, value_type
        ))
        .await;
    }
}

/// `product` with a single searchable varchar attribute
pub fn product_type() -> EntityTypeConfig {
    EntityTypeConfig::new("product", "product").with_attribute(
        "sku",
        AttributeConfig::new(BackendType::Varchar).searchable(true),
    )
}

pub fn development() -> AnalyzerConfig {
    AnalyzerConfig {
        environment: "development".to_string(),
        ..AnalyzerConfig::default()
    }
}

/// Create the exact schema `product_type()` asks for
pub async fn create_product_schema(db: &TestDb) {
    db.create_entity_table("product").await;
    db.create_value_table("product_varchar", "VARCHAR(255)").await;
    db.exec("CREATE INDEX idx_product_sku ON product_varchar (attribute_id, value)")
        .await;
}

/// Captures dispatched events
#[derive(Default)]
pub struct RecordingDispatcher {
    pub events: Mutex<Vec<(String, Value)>>,
}

impl RecordingDispatcher {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: &str, payload: &Value) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload.clone()));
    }
}

/// Executor whose transactions stall before every statement after the first
pub struct SlowExecutor {
    inner: DatabaseConnection,
    delay: Duration,
}

impl SlowExecutor {
    pub fn new(inner: DatabaseConnection, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl SqlExecutor for SlowExecutor {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.inner.query(sql, args).await
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        self.inner.execute(sql, args).await
    }

    async fn begin(&self) -> Result<Box<dyn SqlTransaction>> {
        Ok(Box::new(SlowTransaction {
            inner: self.inner.begin().await?,
            delay: self.delay,
            executed: 0,
        }))
    }
}

struct SlowTransaction {
    inner: Box<dyn SqlTransaction>,
    delay: Duration,
    executed: usize,
}

#[async_trait]
impl SqlTransaction for SlowTransaction {
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.inner.query(sql, args).await
    }

    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        if self.executed > 0 {
            tokio::time::sleep(self.delay).await;
        }
        self.executed += 1;
        self.inner.execute(sql, args).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner.rollback().await
    }
}

pub struct Harness {
    pub db: TestDb,
    pub analyzer: Arc<SchemaAnalyzer>,
    pub backups: Arc<BackupManager>,
    pub engine: SynchronizationEngine,
    pub events: Arc<RecordingDispatcher>,
}

impl Harness {
    pub async fn new(entity_types: Vec<EntityTypeConfig>, config: AnalyzerConfig) -> Self {
        let db = TestDb::new().await;
        Self::with_db(db, entity_types, config)
    }

    pub fn with_db(db: TestDb, entity_types: Vec<EntityTypeConfig>, config: AnalyzerConfig) -> Self {
        let executor = db.executor();
        Self::with_executor(db, executor, entity_types, config)
    }

    /// Wire the stack over `executor`; `db` stays available for fixtures
    pub fn with_executor(
        db: TestDb,
        executor: Arc<dyn SqlExecutor>,
        entity_types: Vec<EntityTypeConfig>,
        config: AnalyzerConfig,
    ) -> Self {
        let registry = Arc::new(StaticRegistry::from_entity_types(entity_types).unwrap());

        let analyzer = Arc::new(SchemaAnalyzer::new(
            registry.clone(),
            executor.clone(),
            config,
        ));
        let backups = Arc::new(BackupManager::new(
            executor.clone(),
            registry,
            &BackupConfig {
                directory: db.backup_dir().display().to_string(),
            },
        ));
        let events = Arc::new(RecordingDispatcher::default());
        let engine = SynchronizationEngine::new(analyzer.clone(), backups.clone(), executor)
            .with_events(events.clone());

        Self {
            db,
            analyzer,
            backups,
            engine,
            events,
        }
    }
}
