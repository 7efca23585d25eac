use thiserror::Error;

/// Main error type for persistence operations
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Storage quota exceeded: needed {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Indexed store error: {0}")]
    IndexedStore(String),

    #[error("Network sync error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Save {id} failed: {reason}")]
    SaveFailed { id: String, reason: String },
}

impl PersistError {
    /// Whether this error means the fast store ran out of room
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Result type alias for persistence operations
pub type Result<T> = std::result::Result<T, PersistError>;
