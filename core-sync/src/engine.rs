//! # Offline Engine Facade
//!
//! Wires the cache, queue, network machinery, and coordinator together
//! from an [`EngineConfig`] and exposes the host-facing surface: cache and
//! queue access, forced sync, an aggregate state snapshot, and the event
//! subscription hosts drive UI indicators from.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use bridge_traits::{ConnectivityProbe, ConnectivitySample, ConnectivityState};
use core_cache::{CacheStore, RefreshRequest, SqliteCacheRepository};
use core_net::{CircuitBreaker, CircuitBreakerConfig, CircuitState, NetworkMonitor, RetryPolicy};
use core_queue::{OfflineQueue, SqliteOperationRepository};
use core_runtime::{EngineConfig, EventBus, EventStream};

use crate::coordinator::{CoordinatorConfig, SyncCoordinator};
use crate::error::{Result, SyncError};

/// Aggregate engine state for host UIs.
#[derive(Debug, Clone)]
pub struct EngineState {
    /// Operations not yet terminal (pending + in flight).
    pub pending_operations: u64,
    /// Debounced connectivity.
    pub connectivity: ConnectivityState,
    /// Per-endpoint circuit states.
    pub circuits: HashMap<String, CircuitState>,
}

/// Fallback probe for hosts that don't report connectivity; the engine
/// then behaves as permanently online and unmetered.
struct AlwaysOnlineProbe;

#[async_trait]
impl ConnectivityProbe for AlwaysOnlineProbe {
    async fn current(&self) -> ConnectivitySample {
        ConnectivitySample::online()
    }

    async fn next_change(&self) -> ConnectivitySample {
        std::future::pending().await
    }
}

/// Receivers handed to the background loops on `start()`.
struct BackgroundChannels {
    force_rx: mpsc::UnboundedReceiver<()>,
    refresh_rx: mpsc::UnboundedReceiver<RefreshRequest>,
}

/// The offline sync engine.
///
/// Construct with [`OfflineEngine::new`], then call [`start`] once to
/// spawn the background loops. All work happens on background tasks;
/// callers only ever await.
///
/// [`start`]: OfflineEngine::start
pub struct OfflineEngine {
    cache: Arc<CacheStore>,
    queue: Arc<OfflineQueue>,
    monitor: Arc<NetworkMonitor>,
    breaker: Arc<CircuitBreaker>,
    coordinator: Arc<SyncCoordinator>,
    events: EventBus,
    cancel: CancellationToken,
    channels: Mutex<Option<BackgroundChannels>>,
}

impl OfflineEngine {
    /// Build the engine: run storage migrations, restore durable state,
    /// and wire the components. Nothing runs until [`start`] is called.
    ///
    /// [`start`]: OfflineEngine::start
    pub async fn new(config: EngineConfig, pool: SqlitePool) -> Result<Self> {
        let events = EventBus::new(config.event_buffer_size);

        let cache_repository = SqliteCacheRepository::new(pool.clone());
        cache_repository.initialize().await?;
        let (cache, refresh_rx) = CacheStore::new(
            Arc::new(cache_repository),
            Arc::clone(&config.clock),
            config.cache_budget_bytes,
            events.clone(),
        );
        let cache = Arc::new(cache);
        cache.load_from_storage().await?;

        let operation_repository = SqliteOperationRepository::new(pool);
        operation_repository.initialize().await?;
        let queue = Arc::new(OfflineQueue::new(
            Arc::new(operation_repository),
            Arc::clone(&config.clock),
            events.clone(),
            config.max_retries,
            config.payment_max_retries,
        ));
        queue.recover().await?;

        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold,
                window: config.circuit_window,
                cooldown: config.circuit_cooldown,
                cooldown_cap: config.circuit_cooldown_cap,
            },
            Arc::clone(&config.clock),
            events.clone(),
        ));

        let probe = config
            .connectivity_probe
            .unwrap_or_else(|| Arc::new(AlwaysOnlineProbe));
        let monitor = Arc::new(NetworkMonitor::new(
            probe,
            events.clone(),
            config.settle_window,
        ));

        let retry_policy = RetryPolicy::new(
            config.retry_base,
            config.retry_cap,
            config.max_retries,
            config.payment_max_retries,
        );

        let (coordinator, force_rx) = SyncCoordinator::new(
            config.transport,
            config.reauth,
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&breaker),
            Arc::clone(&monitor),
            retry_policy,
            events.clone(),
            CoordinatorConfig {
                request_timeout: config.request_timeout,
                sync_interval: config.sync_interval,
                metered_refresh_limit_bytes: config.metered_refresh_limit_bytes,
            },
        );

        Ok(Self {
            cache,
            queue,
            monitor,
            breaker,
            coordinator,
            events,
            cancel: CancellationToken::new(),
            channels: Mutex::new(Some(BackgroundChannels {
                force_rx,
                refresh_rx,
            })),
        })
    }

    /// Spawn the background loops: connectivity monitor, sync trigger
    /// loop, and refresh worker.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` when called more than once.
    pub async fn start(&self) -> Result<()> {
        let channels = self
            .channels
            .lock()
            .await
            .take()
            .ok_or(SyncError::AlreadyStarted)?;

        tokio::spawn(Arc::clone(&self.monitor).run(self.cancel.clone()));
        tokio::spawn(
            Arc::clone(&self.coordinator).run(channels.force_rx, self.cancel.clone()),
        );
        tokio::spawn(
            Arc::clone(&self.coordinator)
                .run_refresh_worker(channels.refresh_rx, self.cancel.clone()),
        );

        info!("Offline engine started");
        Ok(())
    }

    /// Stop all background processing. Durable state is authoritative, so
    /// interrupted work resumes on the next start-up.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        info!("Offline engine shut down");
    }

    /// The cache store.
    pub fn cache(&self) -> Arc<CacheStore> {
        Arc::clone(&self.cache)
    }

    /// The offline operation queue.
    pub fn queue(&self) -> Arc<OfflineQueue> {
        Arc::clone(&self.queue)
    }

    /// Request an immediate sync pass.
    pub fn force_sync(&self) {
        self.coordinator.force_sync();
    }

    /// Aggregate state snapshot ("N changes pending sync").
    pub async fn state(&self) -> Result<EngineState> {
        let stats = self.queue.stats().await?;
        Ok(EngineState {
            pending_operations: stats.pending + stats.in_flight,
            connectivity: self.monitor.state(),
            circuits: self.breaker.snapshot().await,
        })
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }
}
