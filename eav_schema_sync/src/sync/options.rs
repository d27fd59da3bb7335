//! Synchronization options

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// Which differences a sync may apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Only ADD differences
    Additive,
    /// Every difference
    Full,
}

impl FromStr for SyncStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "additive" => Ok(SyncStrategy::Additive),
            "full" => Ok(SyncStrategy::Full),
            other => Err(Error::Configuration(format!(
                "Unknown sync strategy: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStrategy::Additive => write!(f, "additive"),
            SyncStrategy::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    /// Report what would change without touching the database
    pub dry_run: bool,
    /// Allow destructive or dangerous difference sets past validation
    pub force: bool,
    pub skip_validation: bool,
    pub auto_backup: bool,
    /// Bound on the apply transaction
    pub timeout: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::Additive,
            dry_run: false,
            force: false,
            skip_validation: false,
            auto_backup: true,
            timeout: None,
        }
    }
}

impl SyncOptions {
    /// Defaults taken from the `[sync]` configuration section
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            strategy: config.strategy.parse()?,
            auto_backup: config.auto_backup,
            timeout: config.timeout_seconds.map(Duration::from_secs),
            ..Self::default()
        })
    }

    pub fn strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    pub fn auto_backup(mut self, auto_backup: bool) -> Self {
        self.auto_backup = auto_backup;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_defaults_from_config() {
        let config = SyncConfig {
            strategy: "Full".to_string(),
            auto_backup: false,
            max_concurrency: 2,
            timeout_seconds: Some(30),
        };
        let options = SyncOptions::from_config(&config).unwrap();

        assert_eq!(options.strategy, SyncStrategy::Full);
        assert!(!options.auto_backup);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert!(!options.dry_run);
    }

    #[test]
    fn rejects_unknown_strategy() {
        assert!(matches!(
            "aggressive".parse::<SyncStrategy>(),
            Err(Error::Configuration(_))
        ));
    }
}
