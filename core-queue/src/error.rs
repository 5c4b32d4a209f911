use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid operation ID: {0}")]
    InvalidOperationId(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Idempotency key already held by an active operation: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Payment operations require an idempotency key")]
    MissingIdempotencyKey,
}

pub type Result<T> = std::result::Result<T, QueueError>;
