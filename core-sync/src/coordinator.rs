//! # Sync Coordinator
//!
//! Drains the offline queue and refreshes stale cache entries when
//! connectivity allows.
//!
//! ## Overview
//!
//! A sync pass runs on three triggers: the monitor's reconnect
//! notification, a periodic timer, and `force_sync()`. Each pass spawns at
//! most one worker per lane, so lanes drain in parallel while operations
//! within a lane keep their submission order. A separate worker consumes
//! the cache's stale-while-revalidate refresh requests.
//!
//! Every network attempt first consults the endpoint's circuit breaker and
//! is bounded by the request timeout. Failures are disposed of per the
//! retry taxonomy: retryable errors reschedule with backoff, expired
//! credentials get one re-authentication requeue, version conflicts are
//! surfaced and never merged, and other client errors fail terminally.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use bridge_traits::{ReauthProvider, Transport, TransportError, TransportRequest, TransportResponse};
use core_cache::{CacheStore, RefreshRequest};
use core_net::{CircuitBreaker, NetworkMonitor, RetryPolicy};
use core_queue::{
    FailureKind, FailureOutcome, OfflineOperation, OfflineQueue, TerminalReason,
};
use core_runtime::events::{EngineEvent, SyncEvent};
use core_runtime::EventBus;

/// How a failed attempt left the operation.
enum Disposition {
    /// Rescheduled with backoff; the lane has nothing due right now.
    Rescheduled,
    /// Requeued after re-authentication; immediately eligible again.
    Requeued,
    /// Terminally failed.
    Failed,
}

/// Coordinator tunables, carried over from the engine configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub request_timeout: Duration,
    pub sync_interval: Duration,
    pub metered_refresh_limit_bytes: usize,
}

/// Drains queue lanes and lands cache refreshes.
pub struct SyncCoordinator {
    transport: Arc<dyn Transport>,
    reauth: Option<Arc<dyn ReauthProvider>>,
    queue: Arc<OfflineQueue>,
    cache: Arc<CacheStore>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<NetworkMonitor>,
    retry_policy: RetryPolicy,
    events: EventBus,
    config: CoordinatorConfig,
    force_tx: mpsc::UnboundedSender<()>,
}

impl SyncCoordinator {
    /// Create the coordinator and the force-sync receiver its run loop
    /// will consume.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        reauth: Option<Arc<dyn ReauthProvider>>,
        queue: Arc<OfflineQueue>,
        cache: Arc<CacheStore>,
        breaker: Arc<CircuitBreaker>,
        monitor: Arc<NetworkMonitor>,
        retry_policy: RetryPolicy,
        events: EventBus,
        config: CoordinatorConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (force_tx, force_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Self {
            transport,
            reauth,
            queue,
            cache,
            breaker,
            monitor,
            retry_policy,
            events,
            config,
            force_tx,
        });
        (coordinator, force_rx)
    }

    /// Request a sync pass outside the reconnect/interval triggers.
    pub fn force_sync(&self) {
        self.force_tx.send(()).ok();
    }

    /// Main trigger loop. Runs until cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut force_rx: mpsc::UnboundedReceiver<()>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.sync_interval,
            self.config.sync_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let trigger = tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.monitor.wait_reconnect() => "reconnect",
                _ = interval.tick() => "interval",
                received = force_rx.recv() => match received {
                    Some(()) => "forced",
                    None => return,
                },
            };

            if !self.monitor.state().is_online() {
                debug!(trigger, "Skipping sync pass while offline");
                continue;
            }

            self.sync_pass(trigger, &cancel).await;
        }
    }

    /// One full pass: drain every lane with eligible work, in parallel.
    #[instrument(skip(self, cancel))]
    async fn sync_pass(self: &Arc<Self>, trigger: &str, cancel: &CancellationToken) {
        let lanes = match self.queue.lanes_with_work().await {
            Ok(lanes) => lanes,
            Err(e) => {
                error!(error = %e, "Failed to enumerate lanes with work");
                return;
            }
        };
        if lanes.is_empty() {
            debug!(trigger, "No pending work");
            return;
        }

        info!(trigger, lanes = lanes.len(), "Sync pass started");
        self.events
            .emit(EngineEvent::Sync(SyncEvent::Started {
                trigger: trigger.to_string(),
            }))
            .ok();

        let mut workers = Vec::with_capacity(lanes.len());
        for lane in lanes {
            let coordinator = Arc::clone(self);
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                coordinator.drain_lane(lane, cancel).await
            }));
        }

        let mut completed = 0u64;
        let mut failed = 0u64;
        for worker in workers {
            match worker.await {
                Ok((lane_completed, lane_failed)) => {
                    completed += lane_completed;
                    failed += lane_failed;
                }
                Err(e) => error!(error = %e, "Lane worker panicked"),
            }
        }

        info!(trigger, completed, failed, "Sync pass completed");
        self.events
            .emit(EngineEvent::Sync(SyncEvent::Completed {
                trigger: trigger.to_string(),
                operations_completed: completed,
                operations_failed: failed,
            }))
            .ok();
    }

    /// Drain one lane until it has nothing due, its endpoint's circuit
    /// refuses requests, connectivity drops, or the token cancels.
    #[instrument(skip(self, cancel), fields(lane = %lane))]
    async fn drain_lane(&self, lane: String, cancel: CancellationToken) -> (u64, u64) {
        let mut completed = 0u64;
        let mut failed = 0u64;

        loop {
            if cancel.is_cancelled() || !self.monitor.state().is_online() {
                break;
            }

            let operation = match self.queue.dequeue_next(&lane).await {
                Ok(Some(operation)) => operation,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to dequeue from lane");
                    break;
                }
            };

            if !self.breaker.allow_request(&operation.endpoint).await {
                if let Err(e) = self.queue.release(operation.id).await {
                    error!(operation_id = %operation.id, error = %e, "Failed to release operation");
                }
                debug!(endpoint = %operation.endpoint, "Circuit open, lane drain stopped");
                self.events
                    .emit(EngineEvent::Sync(SyncEvent::CircuitSkipped {
                        endpoint: operation.endpoint.clone(),
                        lane: lane.clone(),
                    }))
                    .ok();
                break;
            }

            match self.execute(&operation).await {
                Ok(_) => {
                    self.breaker.record_success(&operation.endpoint).await;
                    if let Err(e) = self.queue.mark_done(operation.id).await {
                        error!(operation_id = %operation.id, error = %e, "Failed to mark operation done");
                        break;
                    }
                    for key in &operation.invalidate_keys {
                        if let Err(e) = self.cache.invalidate(key, true).await {
                            warn!(key, error = %e, "Post-success invalidation failed");
                        }
                    }
                    completed += 1;
                }
                Err(transport_error) => {
                    // Client-side rejections say nothing about endpoint
                    // health; only transient failures feed the breaker.
                    if transport_error.is_retryable() {
                        self.breaker.record_failure(&operation.endpoint).await;
                    }

                    match self.dispose_failure(&operation, &transport_error).await {
                        Ok(Disposition::Rescheduled) => break,
                        Ok(Disposition::Requeued) => continue,
                        Ok(Disposition::Failed) => failed += 1,
                        Err(e) => {
                            error!(operation_id = %operation.id, error = %e, "Failed to record failure");
                            break;
                        }
                    }
                }
            }
        }

        self.events
            .emit(EngineEvent::Sync(SyncEvent::LaneDrained {
                lane,
                completed,
                failed,
            }))
            .ok();
        (completed, failed)
    }

    /// Replay one operation against the transport.
    async fn execute(
        &self,
        operation: &OfflineOperation,
    ) -> bridge_traits::error::Result<TransportResponse> {
        let mut request =
            TransportRequest::new(operation.method, &operation.endpoint, &operation.path)
                .body(operation.payload.clone())
                .timeout(self.config.request_timeout);
        if !operation.idempotency_key.is_empty() {
            request = request.idempotency_key(&operation.idempotency_key);
        }
        self.send_bounded(request).await
    }

    /// Send a request bounded by the configured timeout; an elapsed
    /// request counts as a retryable timeout, and non-2xx responses are
    /// mapped onto the error taxonomy.
    async fn send_bounded(
        &self,
        request: TransportRequest,
    ) -> bridge_traits::error::Result<TransportResponse> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(TransportError::from_status(
                response.status,
                String::from_utf8_lossy(&response.body).into_owned(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Route a failed attempt per the retry taxonomy.
    async fn dispose_failure(
        &self,
        operation: &OfflineOperation,
        transport_error: &TransportError,
    ) -> crate::Result<Disposition> {
        let message = transport_error.to_string();

        match transport_error {
            TransportError::AuthExpired { .. } => {
                if let Some(reauth) = &self.reauth {
                    if !operation.reauth_attempted && reauth.reauthenticate().await {
                        info!(operation_id = %operation.id, "Re-authentication succeeded");
                        if self.queue.requeue_after_reauth(operation.id).await? {
                            return Ok(Disposition::Requeued);
                        }
                    }
                }
                self.queue
                    .mark_failed(
                        operation.id,
                        &message,
                        FailureKind::Terminal {
                            reason: TerminalReason::Auth,
                        },
                    )
                    .await?;
                Ok(Disposition::Failed)
            }
            TransportError::ConflictVersion => {
                // Surfaced, never auto-merged.
                self.queue
                    .mark_failed(
                        operation.id,
                        &message,
                        FailureKind::Terminal {
                            reason: TerminalReason::Conflict,
                        },
                    )
                    .await?;
                self.events
                    .emit(EngineEvent::Sync(SyncEvent::Conflict {
                        operation_id: operation.id.as_str(),
                        lane: operation.lane.clone(),
                    }))
                    .ok();
                Ok(Disposition::Failed)
            }
            error if error.is_retryable() => {
                let delay = self
                    .retry_policy
                    .delay_for(error, operation.retry_count)
                    .unwrap_or_else(|| self.retry_policy.compute_delay(operation.retry_count));
                let outcome = self
                    .queue
                    .mark_failed(operation.id, &message, FailureKind::Retryable { delay })
                    .await?;
                match outcome {
                    FailureOutcome::Rescheduled { .. } => Ok(Disposition::Rescheduled),
                    FailureOutcome::Failed => Ok(Disposition::Failed),
                }
            }
            _ => {
                self.queue
                    .mark_failed(
                        operation.id,
                        &message,
                        FailureKind::Terminal {
                            reason: TerminalReason::ClientError,
                        },
                    )
                    .await?;
                Ok(Disposition::Failed)
            }
        }
    }

    /// Consume stale-while-revalidate refresh requests until cancelled.
    pub async fn run_refresh_worker(
        self: Arc<Self>,
        mut refresh_rx: mpsc::UnboundedReceiver<RefreshRequest>,
        cancel: CancellationToken,
    ) {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => return,
                request = refresh_rx.recv() => match request {
                    Some(request) => request,
                    None => return,
                },
            };
            self.handle_refresh(request).await;
        }
    }

    /// Fetch a stale entry's source and land the result. A refresh is
    /// best-effort: skips and failures leave the stale value in place.
    #[instrument(skip(self, request), fields(key = %request.key))]
    async fn handle_refresh(&self, request: RefreshRequest) {
        let skip_reason = if !self.monitor.state().is_online() {
            Some("offline")
        } else if self.monitor.is_metered()
            && request.size_hint > self.config.metered_refresh_limit_bytes
        {
            Some("metered")
        } else if !self.breaker.allow_request(&request.source.endpoint).await {
            Some("circuit_open")
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            debug!(reason, "Cache refresh skipped");
            self.cache.refresh_done(&request.key).await;
            self.events
                .emit(EngineEvent::Sync(SyncEvent::RefreshSkipped {
                    key: request.key,
                    reason: reason.to_string(),
                }))
                .ok();
            return;
        }

        let fetch = TransportRequest::get(&request.source.endpoint, &request.source.path)
            .timeout(self.config.request_timeout);

        match self.send_bounded(fetch).await {
            Ok(response) => {
                self.breaker.record_success(&request.source.endpoint).await;

                // A matching tag re-marks the entry fresh without touching
                // the payload; otherwise the fetched body replaces it.
                let tag = response.etag.clone().or_else(|| response.version.clone());
                let revalidated = match tag {
                    Some(tag) => self
                        .cache
                        .revalidate(&request.key, &tag)
                        .await
                        .unwrap_or(false),
                    None => false,
                };
                if revalidated {
                    self.cache.refresh_done(&request.key).await;
                } else if let Err(e) = self
                    .cache
                    .complete_refresh(&request.key, response.body)
                    .await
                {
                    warn!(key = %request.key, error = %e, "Failed to store refreshed value");
                    self.cache.refresh_done(&request.key).await;
                    return;
                }

                debug!(key = %request.key, "Cache refresh completed");
                self.events
                    .emit(EngineEvent::Sync(SyncEvent::RefreshCompleted {
                        key: request.key,
                    }))
                    .ok();
            }
            Err(transport_error) => {
                if transport_error.is_retryable() {
                    self.breaker.record_failure(&request.source.endpoint).await;
                }
                warn!(key = %request.key, error = %transport_error, "Cache refresh failed");
                self.cache.refresh_done(&request.key).await;
            }
        }
    }
}
