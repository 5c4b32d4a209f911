//! # Offline Operation State Machine
//!
//! Data model for deferred mutations with validated state transitions.
//!
//! ## Overview
//!
//! An [`OfflineOperation`] is a durable record of a mutation the
//! application performed while offline (or that failed transiently while
//! online). Operations persist across restarts via database storage and
//! are drained by the sync coordinator in priority-then-FIFO order within
//! their lane.
//!
//! ## State Machine
//!
//! ```text
//! Pending → InFlight → Done
//!     ↑         ↓
//!     └─────────┤ (retry / re-auth requeue)
//!               ↓
//!             Failed
//! ```

use crate::{QueueError, Result};
use bridge_traits::Method;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for an offline operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new random operation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an operation ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| QueueError::InvalidOperationId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of an offline operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting to be dequeued (or rescheduled after a retryable failure)
    Pending,
    /// Currently being sent by a lane worker
    InFlight,
    /// Completed successfully; retained for audit
    Done,
    /// Terminal failure; retained for audit
    Failed,
}

impl OperationStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Done | OperationStatus::Failed)
    }

    /// Check if this status counts against idempotency-key dedup
    pub fn is_active(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::InFlight)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InFlight => "in_flight",
            OperationStatus::Done => "done",
            OperationStatus::Failed => "failed",
        }
    }
}

impl FromStr for OperationStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "in_flight" => Ok(OperationStatus::InFlight),
            "done" => Ok(OperationStatus::Done),
            "failed" => Ok(OperationStatus::Failed),
            _ => Err(QueueError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Dequeue priority within a lane. Higher priorities drain first; within a
/// priority, submission order holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Numeric rank for database ordering; lower drains first.
    pub fn rank(&self) -> i64 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    /// Build a priority back from its stored rank
    pub fn from_rank(rank: i64) -> Result<Self> {
        match rank {
            0 => Ok(Priority::High),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::Low),
            _ => Err(QueueError::InvalidPriority(rank.to_string())),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

// ============================================================================
// Operation Draft
// ============================================================================

/// What callers hand to `enqueue`. Retry bookkeeping and timestamps are
/// filled in by the queue.
#[derive(Debug, Clone)]
pub struct OperationDraft {
    pub lane: String,
    pub idempotency_key: String,
    pub endpoint: String,
    pub method: Method,
    pub path: String,
    pub payload: Bytes,
    pub priority: Priority,
    pub payment_class: bool,
    pub invalidate_keys: Vec<String>,
}

impl OperationDraft {
    pub fn new(
        lane: impl Into<String>,
        endpoint: impl Into<String>,
        path: impl Into<String>,
        idempotency_key: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            lane: lane.into(),
            idempotency_key: idempotency_key.into(),
            endpoint: endpoint.into(),
            method: Method::Post,
            path: path.into(),
            payload,
            priority: Priority::Normal,
            payment_class: false,
            invalidate_keys: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as a payment-class mutation: tighter retry budget, mandatory
    /// idempotency key.
    pub fn payment(mut self) -> Self {
        self.payment_class = true;
        self
    }

    /// Cache keys to invalidate (with cascade) once the operation lands.
    pub fn invalidates<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

// ============================================================================
// Offline Operation Entity
// ============================================================================

/// A deferred mutation with retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineOperation {
    /// Unique identifier for this operation
    pub id: OperationId,
    /// Ordering domain; operations in one lane execute in submission order
    pub lane: String,
    /// Dedup key; at most one active operation per key
    pub idempotency_key: String,
    /// Logical endpoint name, used for circuit breaking
    pub endpoint: String,
    /// Request method replayed by the coordinator
    pub method: Method,
    /// Request path handed to the transport
    pub path: String,
    /// Opaque request body
    pub payload: Bytes,
    pub priority: Priority,
    /// Payment-class operations use the tighter retry budget
    pub payment_class: bool,
    /// Cache keys invalidated (with cascade) on success
    pub invalidate_keys: Vec<String>,
    pub status: OperationStatus,
    /// Unix epoch milliseconds when enqueued
    pub created_at: i64,
    /// Attempts consumed so far
    pub retry_count: u32,
    /// Retry budget assigned at enqueue time
    pub max_retries: u32,
    /// Earliest Unix epoch milliseconds the next attempt may run
    pub next_attempt_at: i64,
    /// Whether the one free re-auth requeue has been spent
    pub reauth_attempted: bool,
    /// Last error observed, for audit and the failed listing
    pub error_message: Option<String>,
}

impl OfflineOperation {
    /// Build a fresh pending operation from a draft
    pub fn from_draft(draft: OperationDraft, max_retries: u32, now_ms: i64) -> Self {
        Self {
            id: OperationId::new(),
            lane: draft.lane,
            idempotency_key: draft.idempotency_key,
            endpoint: draft.endpoint,
            method: draft.method,
            path: draft.path,
            payload: draft.payload,
            priority: draft.priority,
            payment_class: draft.payment_class,
            invalidate_keys: draft.invalidate_keys,
            status: OperationStatus::Pending,
            created_at: now_ms,
            retry_count: 0,
            max_retries,
            next_attempt_at: now_ms,
            reauth_attempted: false,
            error_message: None,
        }
    }

    /// Whether the retry budget still allows another attempt
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Mark as in flight
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is not `Pending`
    pub fn begin(&mut self) -> Result<()> {
        self.validate_transition(OperationStatus::InFlight)?;
        self.status = OperationStatus::InFlight;
        Ok(())
    }

    /// Put back to Pending without recording an attempt; used when the
    /// endpoint's circuit refuses the request before it is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is not `InFlight`
    pub fn release(&mut self) -> Result<()> {
        self.validate_transition(OperationStatus::Pending)?;
        self.status = OperationStatus::Pending;
        Ok(())
    }

    /// Mark as completed
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is not `InFlight`
    pub fn complete(&mut self) -> Result<()> {
        self.validate_transition(OperationStatus::Done)?;
        self.status = OperationStatus::Done;
        self.error_message = None;
        Ok(())
    }

    /// Consume one retry and reschedule
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is not `InFlight`
    pub fn reschedule(&mut self, next_attempt_at: i64, error: impl Into<String>) -> Result<()> {
        self.validate_transition(OperationStatus::Pending)?;
        self.status = OperationStatus::Pending;
        self.retry_count += 1;
        self.next_attempt_at = next_attempt_at;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Mark as terminally failed
    ///
    /// # Errors
    ///
    /// Returns an error if the operation is already terminal
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.validate_transition(OperationStatus::Failed)?;
        self.status = OperationStatus::Failed;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Put back to Pending after a successful re-authentication, without
    /// consuming a retry. Allowed once per operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the re-auth requeue was already spent or the
    /// operation is not `InFlight`
    pub fn requeue_for_reauth(&mut self, now_ms: i64) -> Result<()> {
        if self.reauth_attempted {
            return Err(QueueError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "pending".to_string(),
                reason: "Re-auth requeue already attempted".to_string(),
            });
        }
        self.validate_transition(OperationStatus::Pending)?;
        self.status = OperationStatus::Pending;
        self.reauth_attempted = true;
        self.next_attempt_at = now_ms;
        Ok(())
    }

    fn validate_transition(&self, to: OperationStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (OperationStatus::Pending, OperationStatus::InFlight) => true,
            (OperationStatus::Pending, OperationStatus::Failed) => true,
            (OperationStatus::InFlight, OperationStatus::Done) => true,
            (OperationStatus::InFlight, OperationStatus::Pending) => true,
            (OperationStatus::InFlight, OperationStatus::Failed) => true,
            _ => false,
        };

        if !valid {
            return Err(QueueError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
