use std::fmt;

/// Errors returned by the usage store.
///
/// `Clone` so a single failed initialization can be handed to every caller
/// that raced on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("usage store not initialized")]
    NotInitialized,
    #[error("storage unavailable at '{path}': {message}")]
    StorageUnavailable { path: String, message: String },
    #[error("schema setup failed: {0}")]
    Schema(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("connection lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// A non-fatal condition raised while opening the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupWarning {
    /// An additive column migration failed for a reason other than the
    /// column already existing.
    Migration { column: String, message: String },
    /// The cost backfill could not be committed; prior costs are retained.
    Backfill { message: String },
}

impl fmt::Display for StartupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Migration { column, message } => {
                write!(f, "migration adding column '{column}' failed: {message}")
            }
            Self::Backfill { message } => write!(f, "cost backfill failed: {message}"),
        }
    }
}
