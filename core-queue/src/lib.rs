//! # Core Queue
//!
//! Write-path half of the offline engine: a durable, SQLite-backed queue
//! of deferred mutations with idempotency-key dedup, priority/FIFO
//! ordering per lane, retry bookkeeping, and restart recovery.

pub mod error;
pub mod operation;
pub mod queue;
pub mod repository;

pub use error::{QueueError, Result};
pub use operation::{
    OfflineOperation, OperationDraft, OperationId, OperationStatus, Priority,
};
pub use queue::{
    FailureKind, FailureOutcome, OfflineQueue, OperationHandle, OperationOutcome, QueueStats,
    TerminalReason,
};
pub use repository::{OperationRepository, SqliteOperationRepository};
