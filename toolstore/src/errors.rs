use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("SQLite operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transient source failure: {0}")]
    Transient(String),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("persistence conflict: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether the failure is expected to clear on the next scheduled run.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
