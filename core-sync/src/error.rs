use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Queue error: {0}")]
    Queue(#[from] core_queue::QueueError),

    #[error("Cache error: {0}")]
    Cache(#[from] core_cache::CacheError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Engine already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, SyncError>;
