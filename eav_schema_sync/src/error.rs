//! Error types for EAV schema synchronization

use thiserror::Error;

/// Result type for schema sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for schema sync
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown entity type, invalid backend/frontend type, unreadable config
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backup file I/O or database introspection failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Verification failure or a change that needs a manual migration
    #[error("Synchronization error: {0}")]
    Synchronization(String),

    /// Commit or rollback failure. Always fatal.
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error must escape `sync()`/`restore()` instead of being
    /// folded into their result objects
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transaction(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::Configuration(error.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Configuration(error.to_string())
    }
}
