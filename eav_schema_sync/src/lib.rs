//! EAV schema sync: drift detection and safe migration for Entity-Attribute-Value stores
//!
//! Compares the declared entity types and attributes with the physical
//! tables, columns and indexes of the database, scores the risk of fixing
//! the drift, and applies additive fixes inside a transaction with backups
//! and verification.

pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod schema;
pub mod sync;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

// Re-export main types for easier access
pub use backup::{Backup, BackupManager, BackupType, RestoreOptions, RestoreResult};
pub use config::Config;
pub use db::connection::DatabaseConnection;
pub use db::executor::{SqlExecutor, SqlTransaction};
pub use db::migrations::MigrationExecutor;
pub use error::{Error, Result};
pub use models::registry::{EntityTypeRegistry, StaticRegistry};
pub use schema::analyzer::{SchemaAnalysisReport, SchemaAnalyzer};
pub use schema::difference::{DifferenceSet, SchemaDifference};
pub use schema::generator::{GenerateOptions, Migration, MigrationGenerator};
pub use sync::{SyncOptions, SyncResult, SyncStatus, SynchronizationEngine};

use indexmap::IndexMap;
use sync::TracingDispatcher;

/// Initialize logging and a client from a TOML configuration file
pub async fn init(config_path: &str) -> Result<EavSchemaSync> {
    let config = config::load_from_file(config_path)?;
    utils::logging::init_logging(&config.logging)?;
    EavSchemaSync::new(config).await
}

/// The main client, wiring registry, analyzer, backups, generator and engine
pub struct EavSchemaSync {
    config: Config,
    connection: DatabaseConnection,
    analyzer: Arc<SchemaAnalyzer>,
    backups: Arc<BackupManager>,
    generator: MigrationGenerator,
    engine: SynchronizationEngine,
}

impl EavSchemaSync {
    /// Connect and load entity type definitions from `[registry]` paths
    pub async fn new(config: Config) -> Result<Self> {
        let registry = StaticRegistry::from_config(&config.registry)?;
        Self::with_registry(config, Arc::new(registry)).await
    }

    /// Connect using a caller-provided registry
    pub async fn with_registry(
        config: Config,
        registry: Arc<dyn EntityTypeRegistry>,
    ) -> Result<Self> {
        let connection = DatabaseConnection::connect(&config.database).await?;
        let executor: Arc<dyn SqlExecutor> = Arc::new(connection.clone());

        let analyzer = Arc::new(SchemaAnalyzer::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            config.analyzer.clone(),
        ));
        let backups = Arc::new(BackupManager::new(
            Arc::clone(&executor),
            registry,
            &config.backup,
        ));
        let generator = MigrationGenerator::new(&config.migrations, executor.dialect());
        let engine = SynchronizationEngine::new(
            Arc::clone(&analyzer),
            Arc::clone(&backups),
            executor,
        )
        .with_events(Arc::new(TracingDispatcher))
        .with_max_concurrency(config.sync.max_concurrency);

        tracing::info!(driver = %config.database.driver, "EAV schema sync initialized");

        Ok(Self {
            config,
            connection,
            analyzer,
            backups,
            generator,
            engine,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn analyzer(&self) -> &SchemaAnalyzer {
        &self.analyzer
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn engine(&self) -> &SynchronizationEngine {
        &self.engine
    }

    /// Sync options seeded from the `[sync]` configuration section
    pub fn default_sync_options(&self) -> Result<SyncOptions> {
        SyncOptions::from_config(&self.config.sync)
    }

    pub async fn analyze(&self, entity_type_code: &str) -> Result<SchemaAnalysisReport> {
        self.analyzer.analyze(entity_type_code).await
    }

    pub async fn sync(&self, entity_type_code: &str, options: &SyncOptions) -> Result<SyncResult> {
        self.engine.sync(entity_type_code, options).await
    }

    pub async fn sync_all(&self, options: &SyncOptions) -> IndexMap<String, SyncResult> {
        self.engine.sync_all(options).await
    }

    /// Analyze an entity type and write (or preview) the fixing migration
    pub async fn generate_migration(
        &self,
        entity_type_code: &str,
        options: &GenerateOptions,
    ) -> Result<Migration> {
        let report = self.analyzer.analyze(entity_type_code).await?;
        self.generator.generate(&report.differences, options)
    }

    /// Load a migration file for [`MigrationExecutor::execute`]
    pub fn load_migration(&self, path: &Path) -> Result<Migration> {
        MigrationExecutor::new(self.connection.dialect()).load(path)
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}
