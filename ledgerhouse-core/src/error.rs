use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("model error: {0}")]
    Model(#[from] ledgerhouse_model::ModelError),

    #[error("config error: {0}")]
    Config(#[from] ledgerhouse_config::ConfigError),

    #[error("decode failed for {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("{resource} build already in progress")]
    Contention { resource: String },

    #[error("{phase} timed out after {seconds}s")]
    Timeout { phase: String, seconds: u64 },

    /// Events were observed but extraction produced nothing - the build must
    /// fail loudly instead of persisting an empty index.
    #[error("broken extraction in {indexer}: {events_seen} events seen, zero rows produced")]
    BrokenExtraction { indexer: String, events_seen: u64 },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WarehouseError {
    /// True for store failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(sqlx::Error::Database(db)) => {
                let code = db.code();
                let code = code.as_deref().unwrap_or("");
                // SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
                code == "5" || code == "6" || code.starts_with("5:") || code.starts_with("6:")
            }
            Self::Store(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WarehouseError>;
