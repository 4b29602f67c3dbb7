use std::error::Error as StdError;

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;

// Custom error type for cache engine operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid record name: {0}")]
    InvalidRecordName(String),

    #[error("Write session is no longer active")]
    SessionClosed,

    #[error("Source stream error: {0}")]
    Source(Box<dyn StdError + Send + Sync>),
}
