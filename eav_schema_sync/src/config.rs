//! Configuration handling for EAV schema sync

use serde::{Deserialize, Serialize};
use std::fs;

use crate::db::dialect::Dialect;
use crate::error::{Error, Result};
use crate::sync::options::SyncStrategy;

/// Load configuration from a TOML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::Configuration(format!("Failed to read config file: {}", e)))?;

    load_from_str(&config_str)
}

/// Parse configuration from TOML text
pub fn load_from_str(config_str: &str) -> Result<Config> {
    let config: Config = toml::from_str(config_str)
        .map_err(|e| Error::Configuration(format!("Failed to parse config file: {}", e)))?;

    config.validate()?;
    Ok(config)
}

/// Represents the complete schema sync configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        Dialect::from_driver(&self.database.driver)?;
        self.sync.strategy.parse::<SyncStrategy>()?;

        let t = &self.analyzer.risk_thresholds;
        if !(t.medium <= t.high && t.high <= t.dangerous && t.dangerous <= 100) {
            return Err(Error::Configuration(format!(
                "Risk thresholds must be ascending and at most 100 (medium={}, high={}, dangerous={})",
                t.medium, t.high, t.dangerous
            )));
        }

        if self.sync.max_concurrency == 0 {
            return Err(Error::Configuration(
                "sync.max_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Database connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// `mysql` or `sqlite`
    pub driver: String,
    pub url: String,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Schema analysis behavior
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub cache_ttl_seconds: u64,
    /// Deployment environment; `production` raises the risk score
    pub environment: String,
    pub risk_thresholds: RiskThresholds,
    pub report_orphaned_tables: bool,
    pub report_orphaned_columns: bool,
    /// Value-table columns that are never reported as orphaned
    pub allowed_extra_columns: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300,
            environment: "production".to_string(),
            risk_thresholds: RiskThresholds::default(),
            report_orphaned_tables: true,
            report_orphaned_columns: false,
            allowed_extra_columns: vec!["store_id".to_string()],
        }
    }
}

/// Lower bounds of the medium, high and dangerous risk levels
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RiskThresholds {
    pub medium: u32,
    pub high: u32,
    pub dangerous: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 20,
            high: 50,
            dangerous: 80,
        }
    }
}

/// Synchronization defaults
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// `additive` or `full`
    pub strategy: String,
    pub auto_backup: bool,
    pub max_concurrency: usize,
    pub timeout_seconds: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: "additive".to_string(),
            auto_backup: true,
            max_concurrency: 1,
            timeout_seconds: None,
        }
    }
}

/// Backup storage settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub directory: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: "./var/schema_backups".to_string(),
        }
    }
}

/// Migration file settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: "./migrations".to_string(),
        }
    }
}

/// Where entity type definitions are loaded from
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// Files, directories or glob patterns of TOML/YAML definitions
    pub paths: Vec<String>,
    pub recursive_scan: bool,
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = load_from_str(
            r#"
            [database]
            driver = "sqlite"
            url = "sqlite://eav.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.analyzer.cache_ttl_seconds, 300);
        assert_eq!(config.analyzer.risk_thresholds, RiskThresholds::default());
        assert_eq!(config.sync.strategy, "additive");
        assert!(config.logging.is_none());
    }

    #[test]
    fn rejects_unknown_driver() {
        let err = load_from_str(
            r#"
            [database]
            driver = "oracle"
            url = "oracle://db"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
    }

    #[rstest::rstest]
    #[case("MySQL")]
    #[case("mariadb")]
    #[case("SQLite")]
    fn accepts_driver_aliases(#[case] driver: &str) {
        let config = load_from_str(&format!(
            "[database]\ndriver = \"{}\"\nurl = \"db://eav\"\n",
            driver
        ));

        assert!(config.is_ok(), "{:?}", config.err());
    }

    #[test]
    fn rejects_unknown_sync_strategy() {
        let err = load_from_str(
            r#"
            [database]
            driver = "sqlite"
            url = "sqlite://eav.db"

            [sync]
            strategy = "aggressive"
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("Unknown sync strategy"));
    }

    #[test]
    fn rejects_descending_thresholds() {
        let err = load_from_str(
            r#"
            [database]
            driver = "mysql"
            url = "mysql://root@localhost/eav"

            [analyzer.risk_thresholds]
            medium = 60
            high = 40
            dangerous = 90
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("ascending"));
    }
}
