//! # Offline Queue
//!
//! Durable queue of deferred mutations with idempotency-key dedup,
//! priority/FIFO-per-lane dequeue, and terminal-status handles.
//!
//! ## Overview
//!
//! `enqueue` persists the operation before returning, so accepted work
//! survives a crash. Callers get an [`OperationHandle`] they can await for
//! the terminal outcome; the sync coordinator drains lanes through
//! `dequeue_next`/`mark_done`/`mark_failed`. At most one operation per
//! lane is in flight at a time, which preserves submission order within
//! the lane while letting lanes drain in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use bridge_traits::Clock;
use core_runtime::events::{EngineEvent, QueueEvent};
use core_runtime::EventBus;

use crate::error::{QueueError, Result};
use crate::operation::{OfflineOperation, OperationDraft, OperationId, OperationStatus};
use crate::repository::OperationRepository;

// ============================================================================
// Handles and Outcomes
// ============================================================================

/// Terminal outcome observed through an [`OperationHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Not yet terminal.
    Pending,
    /// Completed successfully.
    Done,
    /// Failed terminally.
    Failed { message: String },
}

impl OperationOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationOutcome::Pending)
    }
}

/// Caller-side view of an enqueued operation.
///
/// Backed by `tokio::sync::watch`, so the terminal outcome is observable
/// even when the handle is awaited after the operation resolved.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: OperationId,
    deduplicated: bool,
    receiver: watch::Receiver<OperationOutcome>,
}

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Whether `enqueue` matched an existing active operation instead of
    /// creating a new one.
    pub fn was_deduplicated(&self) -> bool {
        self.deduplicated
    }

    /// The outcome as currently known, without waiting.
    pub fn outcome(&self) -> OperationOutcome {
        self.receiver.borrow().clone()
    }

    /// Wait for the operation to reach a terminal status.
    pub async fn resolved(&mut self) -> OperationOutcome {
        if let Ok(outcome) = self
            .receiver
            .wait_for(|outcome| outcome.is_terminal())
            .await
        {
            return outcome.clone();
        }
        // Queue dropped without resolving; report what we last saw.
        self.receiver.borrow().clone()
    }
}

/// How a failed attempt should be disposed of, decided by the caller's
/// retry policy.
#[derive(Debug, Clone)]
pub enum FailureKind {
    /// Retryable; reschedule after `delay` if budget remains.
    Retryable { delay: Duration },
    /// Terminal; never retried.
    Terminal { reason: TerminalReason },
}

/// Terminal failure classification carried on events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// Retry budget exhausted.
    QueueExhausted,
    /// Version conflict; surfaced to the user.
    Conflict,
    /// Permanent client error (400/422/...).
    ClientError,
    /// Credentials expired and could not be refreshed.
    Auth,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::QueueExhausted => "queue_exhausted",
            TerminalReason::Conflict => "conflict",
            TerminalReason::ClientError => "client_error",
            TerminalReason::Auth => "auth",
        }
    }
}

/// Result of `mark_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Rescheduled for another attempt at the given time.
    Rescheduled { next_attempt_at: i64 },
    /// Terminally failed.
    Failed,
}

/// Queue depth by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub done: u64,
    pub failed: u64,
}

// ============================================================================
// Offline Queue
// ============================================================================

/// Durable offline operation queue.
pub struct OfflineQueue {
    repository: Arc<dyn OperationRepository>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    max_retries: u32,
    payment_max_retries: u32,
    /// Live watch senders for unresolved operations.
    handles: Mutex<HashMap<OperationId, watch::Sender<OperationOutcome>>>,
}

impl OfflineQueue {
    pub fn new(
        repository: Arc<dyn OperationRepository>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        max_retries: u32,
        payment_max_retries: u32,
    ) -> Self {
        Self {
            repository,
            clock,
            events,
            max_retries,
            payment_max_retries,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Accept a mutation into the queue.
    ///
    /// A draft whose idempotency key matches an active (Pending/InFlight)
    /// operation does not create a duplicate; the returned handle observes
    /// the existing operation.
    ///
    /// # Errors
    ///
    /// Returns an error for payment-class drafts without an idempotency
    /// key, or on storage failure.
    pub async fn enqueue(&self, draft: OperationDraft) -> Result<OperationHandle> {
        if draft.payment_class && draft.idempotency_key.is_empty() {
            return Err(QueueError::MissingIdempotencyKey);
        }

        let max_retries = if draft.payment_class {
            self.payment_max_retries
        } else {
            self.max_retries
        };

        // Dedup is enforced twice: the lookup covers the common case, and
        // the unique index on active keys closes the window between lookup
        // and insert for concurrent enqueues of the same key.
        loop {
            if !draft.idempotency_key.is_empty() {
                if let Some(existing) = self
                    .repository
                    .find_active_by_idempotency_key(&draft.idempotency_key)
                    .await?
                {
                    debug!(
                        operation_id = %existing.id,
                        idempotency_key = %draft.idempotency_key,
                        "Enqueue deduplicated against active operation"
                    );
                    self.events
                        .emit(EngineEvent::Queue(QueueEvent::Deduplicated {
                            operation_id: existing.id.as_str(),
                            idempotency_key: draft.idempotency_key.clone(),
                        }))
                        .ok();
                    return self.handle_for(existing.id, true).await;
                }
            }

            let operation =
                OfflineOperation::from_draft(draft.clone(), max_retries, self.clock.now_ms());
            match self.repository.insert(&operation).await {
                Ok(()) => {
                    info!(
                        operation_id = %operation.id,
                        lane = %operation.lane,
                        endpoint = %operation.endpoint,
                        priority = ?operation.priority,
                        "Operation enqueued"
                    );
                    self.events
                        .emit(EngineEvent::Queue(QueueEvent::Enqueued {
                            operation_id: operation.id.as_str(),
                            lane: operation.lane.clone(),
                            idempotency_key: operation.idempotency_key.clone(),
                        }))
                        .ok();
                    return self.handle_for(operation.id, false).await;
                }
                // Lost the insert race on the key; loop back and observe
                // the winner.
                Err(QueueError::DuplicateIdempotencyKey(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Take the next eligible operation in a lane and mark it InFlight.
    ///
    /// Returns `None` when the lane is empty, nothing is due yet, or the
    /// lane already has an InFlight operation.
    pub async fn dequeue_next(&self, lane: &str) -> Result<Option<OfflineOperation>> {
        if self.repository.has_in_flight(lane).await? {
            return Ok(None);
        }

        let now = self.clock.now_ms();
        let Some(mut operation) = self.repository.next_pending_in_lane(lane, now).await? else {
            return Ok(None);
        };

        operation.begin()?;
        self.repository.update(&operation).await?;
        Ok(Some(operation))
    }

    /// Resolve an operation as completed.
    pub async fn mark_done(&self, id: OperationId) -> Result<OfflineOperation> {
        let mut operation = self.require(id).await?;
        operation.complete()?;
        self.repository.update(&operation).await?;

        info!(operation_id = %id, lane = %operation.lane, "Operation completed");
        self.events
            .emit(EngineEvent::Queue(QueueEvent::Done {
                operation_id: id.as_str(),
                lane: operation.lane.clone(),
            }))
            .ok();
        self.resolve(id, OperationOutcome::Done).await;

        Ok(operation)
    }

    /// Record a failed attempt.
    ///
    /// Retryable failures consume one retry and reschedule after the
    /// caller-computed delay; once the budget is spent they become
    /// terminal with reason `queue_exhausted`. Terminal failures resolve
    /// the handle immediately.
    pub async fn mark_failed(
        &self,
        id: OperationId,
        error: &str,
        kind: FailureKind,
    ) -> Result<FailureOutcome> {
        let mut operation = self.require(id).await?;

        let (outcome, reason) = match kind {
            FailureKind::Retryable { delay } if operation.has_retries_left() => {
                let next_attempt_at = self.clock.now_ms() + delay.as_millis() as i64;
                operation.reschedule(next_attempt_at, error)?;
                (FailureOutcome::Rescheduled { next_attempt_at }, None)
            }
            FailureKind::Retryable { .. } => {
                operation.fail(error)?;
                (FailureOutcome::Failed, Some(TerminalReason::QueueExhausted))
            }
            FailureKind::Terminal { reason } => {
                operation.fail(error)?;
                (FailureOutcome::Failed, Some(reason))
            }
        };
        self.repository.update(&operation).await?;

        match (outcome, reason) {
            (FailureOutcome::Rescheduled { next_attempt_at }, _) => {
                debug!(
                    operation_id = %id,
                    retry_count = operation.retry_count,
                    next_attempt_at,
                    error,
                    "Operation rescheduled for retry"
                );
                self.events
                    .emit(EngineEvent::Queue(QueueEvent::Retrying {
                        operation_id: id.as_str(),
                        lane: operation.lane.clone(),
                        retry_count: operation.retry_count,
                        next_attempt_at,
                    }))
                    .ok();
            }
            (FailureOutcome::Failed, reason) => {
                let reason = reason.unwrap_or(TerminalReason::ClientError);
                warn!(
                    operation_id = %id,
                    lane = %operation.lane,
                    reason = reason.as_str(),
                    error,
                    "Operation failed terminally"
                );
                self.events
                    .emit(EngineEvent::Queue(QueueEvent::Failed {
                        operation_id: id.as_str(),
                        lane: operation.lane.clone(),
                        message: error.to_string(),
                        reason: reason.as_str().to_string(),
                    }))
                    .ok();
                self.resolve(
                    id,
                    OperationOutcome::Failed {
                        message: error.to_string(),
                    },
                )
                .await;
            }
        }

        Ok(outcome)
    }

    /// Put an InFlight operation back to Pending without recording an
    /// attempt. Used when the request was refused locally (open circuit)
    /// rather than failed remotely.
    pub async fn release(&self, id: OperationId) -> Result<()> {
        let mut operation = self.require(id).await?;
        operation.release()?;
        self.repository.update(&operation).await?;
        debug!(operation_id = %id, "Operation released back to pending");
        Ok(())
    }

    /// Put an InFlight operation back to Pending after a successful
    /// re-authentication, without consuming a retry.
    ///
    /// Returns `false` when the free requeue was already spent; the caller
    /// then fails the operation terminally.
    pub async fn requeue_after_reauth(&self, id: OperationId) -> Result<bool> {
        let mut operation = self.require(id).await?;
        if operation.reauth_attempted {
            return Ok(false);
        }
        operation.requeue_for_reauth(self.clock.now_ms())?;
        self.repository.update(&operation).await?;
        info!(operation_id = %id, "Operation requeued after re-authentication");
        Ok(true)
    }

    /// Lanes that currently hold an eligible pending operation.
    pub async fn lanes_with_work(&self) -> Result<Vec<String>> {
        self.repository.lanes_with_pending(self.clock.now_ms()).await
    }

    /// Startup recovery: revert InFlight rows to Pending. Execution is
    /// at-least-once; idempotency keys give at-most-once effect remotely.
    pub async fn recover(&self) -> Result<u64> {
        let reset = self.repository.reset_in_flight().await?;
        if reset > 0 {
            info!(reset, "Recovered in-flight operations to pending");
        }
        Ok(reset)
    }

    /// Queue depth by status.
    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self
                .repository
                .count_by_status(OperationStatus::Pending)
                .await?,
            in_flight: self
                .repository
                .count_by_status(OperationStatus::InFlight)
                .await?,
            done: self.repository.count_by_status(OperationStatus::Done).await?,
            failed: self
                .repository
                .count_by_status(OperationStatus::Failed)
                .await?,
        })
    }

    /// Terminally failed operations, for surfacing to the host.
    pub async fn failed_operations(&self) -> Result<Vec<OfflineOperation>> {
        self.repository.list_failed().await
    }

    async fn require(&self, id: OperationId) -> Result<OfflineOperation> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| QueueError::OperationNotFound(id.as_str()))
    }

    async fn handle_for(&self, id: OperationId, deduplicated: bool) -> Result<OperationHandle> {
        let mut handles = self.handles.lock().await;
        if let Some(sender) = handles.get(&id) {
            return Ok(OperationHandle {
                id,
                deduplicated,
                receiver: sender.subscribe(),
            });
        }

        // No live sender; seed from the persisted status so a handle taken
        // after the operation resolved still observes the terminal outcome.
        // The handles lock is held across the read, and status is persisted
        // before `resolve` runs, so the outcome cannot be missed in between.
        let initial = match self.repository.find_by_id(id).await? {
            Some(operation) => match operation.status {
                OperationStatus::Done => OperationOutcome::Done,
                OperationStatus::Failed => OperationOutcome::Failed {
                    message: operation.error_message.unwrap_or_default(),
                },
                _ => OperationOutcome::Pending,
            },
            None => return Err(QueueError::OperationNotFound(id.as_str())),
        };

        if initial.is_terminal() {
            // Already resolved; nothing will send again, so the handle gets
            // a detached receiver holding the terminal outcome.
            let (_, receiver) = watch::channel(initial);
            return Ok(OperationHandle {
                id,
                deduplicated,
                receiver,
            });
        }

        let sender = handles
            .entry(id)
            .or_insert_with(|| watch::channel(OperationOutcome::Pending).0);
        Ok(OperationHandle {
            id,
            deduplicated,
            receiver: sender.subscribe(),
        })
    }

    async fn resolve(&self, id: OperationId, outcome: OperationOutcome) {
        if let Some(sender) = self.handles.lock().await.remove(&id) {
            sender.send(outcome).ok();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Priority;
    use crate::repository::SqliteOperationRepository;
    use bridge_traits::ManualClock;
    use bytes::Bytes;
    use sqlx::SqlitePool;

    async fn test_queue() -> (OfflineQueue, Arc<ManualClock>) {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        let repo = SqliteOperationRepository::new(pool);
        repo.initialize().await.unwrap();

        let clock = Arc::new(ManualClock::new(0));
        let queue = OfflineQueue::new(
            Arc::new(repo),
            clock.clone(),
            EventBus::new(32),
            3,
            1,
        );
        (queue, clock)
    }

    fn draft(lane: &str, key: &str) -> OperationDraft {
        OperationDraft::new(lane, lane, format!("/v1/{lane}"), key, Bytes::from_static(b"{}"))
    }

    #[tokio::test]
    async fn enqueue_dedups_on_idempotency_key() {
        let (queue, _clock) = test_queue().await;

        let first = queue.enqueue(draft("cart", "intent-1")).await.unwrap();
        let second = queue.enqueue(draft("cart", "intent-1")).await.unwrap();

        assert!(!first.was_deduplicated());
        assert!(second.was_deduplicated());
        assert_eq!(first.id(), second.id());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn dedup_releases_after_terminal_status() {
        let (queue, _clock) = test_queue().await;

        let first = queue.enqueue(draft("cart", "intent-1")).await.unwrap();
        let op = queue.dequeue_next("cart").await.unwrap().unwrap();
        assert_eq!(op.id, first.id());
        queue.mark_done(op.id).await.unwrap();

        // Key is free again once the holder is terminal.
        let second = queue.enqueue(draft("cart", "intent-1")).await.unwrap();
        assert!(!second.was_deduplicated());
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn payment_requires_idempotency_key() {
        let (queue, _clock) = test_queue().await;

        let result = queue.enqueue(draft("payments", "").payment()).await;
        assert!(matches!(result, Err(QueueError::MissingIdempotencyKey)));

        // Payment retry budget is the tighter one.
        let handle = queue
            .enqueue(draft("payments", "pay-1").payment())
            .await
            .unwrap();
        let op = queue.dequeue_next("payments").await.unwrap().unwrap();
        assert_eq!(op.id, handle.id());
        assert_eq!(op.max_retries, 1);
    }

    #[tokio::test]
    async fn one_in_flight_per_lane() {
        let (queue, _clock) = test_queue().await;

        queue.enqueue(draft("cart", "a")).await.unwrap();
        queue.enqueue(draft("cart", "b")).await.unwrap();

        let first = queue.dequeue_next("cart").await.unwrap().unwrap();
        // Lane is busy until the in-flight operation resolves.
        assert!(queue.dequeue_next("cart").await.unwrap().is_none());

        queue.mark_done(first.id).await.unwrap();
        let second = queue.dequeue_next("cart").await.unwrap().unwrap();
        assert_eq!(second.idempotency_key, "b");
    }

    #[tokio::test]
    async fn lanes_drain_independently() {
        let (queue, _clock) = test_queue().await;

        queue.enqueue(draft("cart", "a")).await.unwrap();
        queue.enqueue(draft("orders", "b")).await.unwrap();

        let cart = queue.dequeue_next("cart").await.unwrap().unwrap();
        let orders = queue.dequeue_next("orders").await.unwrap().unwrap();
        assert_eq!(cart.lane, "cart");
        assert_eq!(orders.lane, "orders");
    }

    #[tokio::test]
    async fn priority_beats_fifo_within_lane() {
        let (queue, clock) = test_queue().await;

        queue.enqueue(draft("cart", "normal-1")).await.unwrap();
        clock.advance_ms(10);
        queue
            .enqueue(draft("cart", "urgent").priority(Priority::High))
            .await
            .unwrap();

        let first = queue.dequeue_next("cart").await.unwrap().unwrap();
        assert_eq!(first.idempotency_key, "urgent");
    }

    #[tokio::test]
    async fn retryable_failure_reschedules_then_exhausts() {
        let (queue, clock) = test_queue().await;

        let mut handle = queue.enqueue(draft("cart", "a")).await.unwrap();
        let delay = Duration::from_secs(5);

        for attempt in 0..3 {
            let op = queue.dequeue_next("cart").await.unwrap().unwrap();
            let outcome = queue
                .mark_failed(op.id, "HTTP 503", FailureKind::Retryable { delay })
                .await
                .unwrap();
            assert!(
                matches!(outcome, FailureOutcome::Rescheduled { .. }),
                "attempt {attempt} should reschedule"
            );

            // Not due until the backoff elapses.
            assert!(queue.dequeue_next("cart").await.unwrap().is_none());
            clock.advance_ms(5_000);
        }

        // Fourth attempt exhausts the budget of 3 retries.
        let op = queue.dequeue_next("cart").await.unwrap().unwrap();
        let outcome = queue
            .mark_failed(op.id, "HTTP 503", FailureKind::Retryable { delay })
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);

        assert_eq!(
            handle.resolved().await,
            OperationOutcome::Failed {
                message: "HTTP 503".to_string()
            }
        );
    }

    #[tokio::test]
    async fn terminal_failure_resolves_handle() {
        let (queue, _clock) = test_queue().await;

        let mut handle = queue.enqueue(draft("orders", "a")).await.unwrap();
        let op = queue.dequeue_next("orders").await.unwrap().unwrap();
        queue
            .mark_failed(
                op.id,
                "HTTP 409",
                FailureKind::Terminal {
                    reason: TerminalReason::Conflict,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            handle.resolved().await,
            OperationOutcome::Failed {
                message: "HTTP 409".to_string()
            }
        );
        assert_eq!(queue.failed_operations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn done_resolves_handle() {
        let (queue, _clock) = test_queue().await;

        let mut handle = queue.enqueue(draft("cart", "a")).await.unwrap();
        let op = queue.dequeue_next("cart").await.unwrap().unwrap();
        queue.mark_done(op.id).await.unwrap();

        assert_eq!(handle.resolved().await, OperationOutcome::Done);
    }

    #[tokio::test]
    async fn resolved_reports_last_seen_when_queue_drops() {
        let (queue, _clock) = test_queue().await;

        let mut handle = queue.enqueue(draft("cart", "a")).await.unwrap();
        drop(queue);

        // Nothing will resolve the operation anymore; the handle still
        // returns instead of waiting forever.
        assert_eq!(handle.resolved().await, OperationOutcome::Pending);
    }

    #[tokio::test]
    async fn concurrent_enqueues_share_one_operation() {
        // A single-connection pool keeps every task on the same in-memory
        // database while still letting enqueues interleave between the
        // dedup lookup and the insert.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        let repo = SqliteOperationRepository::new(pool);
        repo.initialize().await.unwrap();
        let queue = Arc::new(OfflineQueue::new(
            Arc::new(repo),
            Arc::new(ManualClock::new(0)),
            EventBus::new(128),
            3,
            1,
        ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                queue.enqueue(draft("cart", "intent-1")).await.unwrap()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().id());
        }

        assert_eq!(ids.len(), 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn handle_taken_after_resolution_observes_outcome() {
        let (queue, _clock) = test_queue().await;

        let done = queue.enqueue(draft("cart", "a")).await.unwrap();
        let op = queue.dequeue_next("cart").await.unwrap().unwrap();
        queue.mark_done(op.id).await.unwrap();

        let failed = queue.enqueue(draft("orders", "b")).await.unwrap();
        let op = queue.dequeue_next("orders").await.unwrap().unwrap();
        queue
            .mark_failed(
                op.id,
                "HTTP 422",
                FailureKind::Terminal {
                    reason: TerminalReason::ClientError,
                },
            )
            .await
            .unwrap();

        // Handles taken after resolution are seeded from persisted status
        // rather than starting at Pending and hanging.
        let mut late = queue.handle_for(done.id(), false).await.unwrap();
        assert_eq!(late.outcome(), OperationOutcome::Done);
        assert_eq!(late.resolved().await, OperationOutcome::Done);

        let late = queue.handle_for(failed.id(), false).await.unwrap();
        assert_eq!(
            late.outcome(),
            OperationOutcome::Failed {
                message: "HTTP 422".to_string()
            }
        );

        assert!(matches!(
            queue.handle_for(OperationId::new(), false).await,
            Err(QueueError::OperationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn release_returns_operation_without_an_attempt() {
        let (queue, _clock) = test_queue().await;

        queue.enqueue(draft("cart", "a")).await.unwrap();
        let op = queue.dequeue_next("cart").await.unwrap().unwrap();
        queue.release(op.id).await.unwrap();

        let op = queue.dequeue_next("cart").await.unwrap().unwrap();
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.idempotency_key, "a");
    }

    #[tokio::test]
    async fn reauth_requeue_once_without_consuming_retry() {
        let (queue, _clock) = test_queue().await;

        queue.enqueue(draft("cart", "a")).await.unwrap();
        let op = queue.dequeue_next("cart").await.unwrap().unwrap();

        assert!(queue.requeue_after_reauth(op.id).await.unwrap());
        let op = queue.dequeue_next("cart").await.unwrap().unwrap();
        assert_eq!(op.retry_count, 0);
        assert!(op.reauth_attempted);

        // Second auth failure does not get another free pass.
        assert!(!queue.requeue_after_reauth(op.id).await.unwrap());
    }

    #[tokio::test]
    async fn recover_reverts_in_flight() {
        let (queue, _clock) = test_queue().await;

        queue.enqueue(draft("cart", "a")).await.unwrap();
        queue.dequeue_next("cart").await.unwrap().unwrap();
        assert_eq!(queue.stats().await.unwrap().in_flight, 1);

        assert_eq!(queue.recover().await.unwrap(), 1);
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.pending, 1);
        assert_eq!(queue.lanes_with_work().await.unwrap(), vec!["cart"]);
    }
}
