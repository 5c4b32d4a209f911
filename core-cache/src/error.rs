use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Refresh channel closed")]
    RefreshChannelClosed,
}

pub type Result<T> = std::result::Result<T, CacheError>;
