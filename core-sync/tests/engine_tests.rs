//! End-to-end engine tests over a scripted transport: queue draining on
//! reconnect, the retry taxonomy, circuit breaking, and
//! stale-while-revalidate refreshes.

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use bridge_traits::{
    ConnectivityProbe, ConnectivitySample, ConnectivityState, ReauthProvider, Transport,
    TransportError, TransportRequest, TransportResponse,
};
use core_cache::{CachePolicy, CacheWrite, Freshness};
use core_queue::{OperationDraft, OperationOutcome, Priority};
use core_runtime::events::{EngineEvent, SyncEvent};
use core_runtime::{EngineConfig, EventStream};
use core_sync::OfflineEngine;

// ============================================================================
// Test doubles
// ============================================================================

/// Transport that replays a scripted sequence of results and records every
/// request it sees. Once the script is exhausted it answers 200 OK.
struct ScriptedTransport {
    script: Mutex<VecDeque<bridge_traits::error::Result<TransportResponse>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    fn new(
        script: Vec<bridge_traits::error::Result<TransportResponse>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn always_ok() -> Arc<Self> {
        Self::new(Vec::new())
    }

    async fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().await.clone()
    }

    async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> bridge_traits::error::Result<TransportResponse> {
        self.requests.lock().await.push(request);
        match self.script.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(TransportResponse::ok(Bytes::new())),
        }
    }
}

/// Probe fed from a test-controlled channel.
struct ScriptedProbe {
    initial: ConnectivitySample,
    changes: Mutex<mpsc::UnboundedReceiver<ConnectivitySample>>,
}

impl ScriptedProbe {
    fn new(
        initial: ConnectivitySample,
    ) -> (Arc<Self>, mpsc::UnboundedSender<ConnectivitySample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let probe = Arc::new(Self {
            initial,
            changes: Mutex::new(rx),
        });
        (probe, tx)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn current(&self) -> ConnectivitySample {
        self.initial
    }

    async fn next_change(&self) -> ConnectivitySample {
        let mut changes = self.changes.lock().await;
        match changes.recv().await {
            Some(sample) => sample,
            None => std::future::pending().await,
        }
    }
}

struct CountingReauth {
    calls: AtomicU32,
    succeed: bool,
}

impl CountingReauth {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            succeed,
        })
    }
}

#[async_trait]
impl ReauthProvider for CountingReauth {
    async fn reauthenticate(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.succeed
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn base_config(transport: Arc<dyn Transport>) -> core_runtime::EngineConfigBuilder {
    EngineConfig::builder()
        .transport(transport)
        .retry_base(Duration::ZERO)
        .retry_cap(Duration::ZERO)
        .settle_window(Duration::from_millis(10))
        .request_timeout(Duration::from_secs(5))
        .sync_interval(Duration::from_secs(300))
}

/// Single-connection pool: each new in-memory SQLite connection would be
/// a separate empty database, and the engine queries from several tasks.
async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap()
}

async fn engine_with(config: EngineConfig) -> OfflineEngine {
    OfflineEngine::new(config, memory_pool().await).await.unwrap()
}

fn draft(lane: &str, path: &str, key: &str) -> OperationDraft {
    OperationDraft::new(lane, lane, path, key, Bytes::from_static(b"{}"))
}

async fn resolved(handle: &mut core_queue::OperationHandle) -> OperationOutcome {
    tokio::time::timeout(Duration::from_secs(5), handle.resolved())
        .await
        .expect("operation did not resolve in time")
}

async fn wait_for_event<F>(stream: &mut EventStream, predicate: F) -> EngineEvent
where
    F: Fn(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
    })
    .await
    .expect("expected event did not arrive in time")
}

// ============================================================================
// Queue draining
// ============================================================================

#[tokio::test]
async fn queued_work_drains_on_reconnect_in_lane_order() {
    let transport = ScriptedTransport::always_ok();
    let (probe, probe_tx) = ScriptedProbe::new(ConnectivitySample::offline());
    let config = base_config(transport.clone())
        .connectivity_probe(probe)
        .build()
        .unwrap();
    let engine = engine_with(config).await;
    let queue = engine.queue();

    let mut first = queue
        .enqueue(draft("cart", "/v1/cart/a", "a"))
        .await
        .unwrap();
    let mut second = queue
        .enqueue(draft("cart", "/v1/cart/b", "b"))
        .await
        .unwrap();
    let mut other = queue
        .enqueue(draft("orders", "/v1/orders", "c"))
        .await
        .unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Offline: nothing was sent, work is parked durably.
    assert_eq!(transport.request_count().await, 0);
    let state = engine.state().await.unwrap();
    assert_eq!(state.pending_operations, 3);
    assert_eq!(state.connectivity, ConnectivityState::Offline);

    // Back online: the reconnect trigger drains every lane.
    probe_tx.send(ConnectivitySample::online()).unwrap();

    assert_eq!(resolved(&mut first).await, OperationOutcome::Done);
    assert_eq!(resolved(&mut second).await, OperationOutcome::Done);
    assert_eq!(resolved(&mut other).await, OperationOutcome::Done);

    // Within the cart lane, submission order held.
    let requests = transport.requests().await;
    let cart_paths: Vec<&str> = requests
        .iter()
        .filter(|r| r.endpoint == "cart")
        .map(|r| r.path.as_str())
        .collect();
    assert_eq!(cart_paths, vec!["/v1/cart/a", "/v1/cart/b"]);

    // The idempotency key rode along for server-side dedup.
    assert!(requests
        .iter()
        .all(|r| r.headers.contains_key("Idempotency-Key")));

    assert_eq!(engine.state().await.unwrap().pending_operations, 0);
    engine.shutdown();
}

#[tokio::test]
async fn high_priority_jumps_the_lane() {
    let transport = ScriptedTransport::always_ok();
    let config = base_config(transport.clone()).build().unwrap();
    let engine = engine_with(config).await;
    let queue = engine.queue();

    let mut normal = queue
        .enqueue(draft("cart", "/v1/cart/normal", "n"))
        .await
        .unwrap();
    let mut urgent = queue
        .enqueue(draft("cart", "/v1/cart/urgent", "u").priority(Priority::High))
        .await
        .unwrap();

    engine.start().await.unwrap();
    assert_eq!(resolved(&mut urgent).await, OperationOutcome::Done);
    assert_eq!(resolved(&mut normal).await, OperationOutcome::Done);

    let paths: Vec<String> = transport
        .requests()
        .await
        .iter()
        .map(|r| r.path.clone())
        .collect();
    assert_eq!(paths, vec!["/v1/cart/urgent", "/v1/cart/normal"]);
    engine.shutdown();
}

// ============================================================================
// Failure taxonomy
// ============================================================================

#[tokio::test]
async fn retryable_failure_backs_off_then_succeeds() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::ServerError { status: 503 }),
        Ok(TransportResponse::ok(Bytes::new())),
    ]);
    let config = base_config(transport.clone()).build().unwrap();
    let engine = engine_with(config).await;

    let mut handle = engine
        .queue()
        .enqueue(draft("cart", "/v1/cart", "a"))
        .await
        .unwrap();
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // First pass failed and rescheduled; a second pass replays it.
    engine.force_sync();
    assert_eq!(resolved(&mut handle).await, OperationOutcome::Done);
    assert_eq!(transport.request_count().await, 2);
    engine.shutdown();
}

#[tokio::test]
async fn client_error_fails_terminally_without_retry() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::ClientError {
        status: 422,
        message: "validation failed".to_string(),
    })]);
    let config = base_config(transport.clone()).build().unwrap();
    let engine = engine_with(config).await;

    let mut handle = engine
        .queue()
        .enqueue(draft("cart", "/v1/cart", "a"))
        .await
        .unwrap();
    engine.start().await.unwrap();

    assert!(matches!(
        resolved(&mut handle).await,
        OperationOutcome::Failed { .. }
    ));

    // A later pass does not touch the terminally failed operation.
    engine.force_sync();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.request_count().await, 1);
    assert_eq!(engine.queue().failed_operations().await.unwrap().len(), 1);
    engine.shutdown();
}

#[tokio::test]
async fn version_conflict_is_surfaced_never_merged() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::ConflictVersion)]);
    let config = base_config(transport.clone()).build().unwrap();
    let engine = engine_with(config).await;
    let mut events = engine.subscribe();

    let mut handle = engine
        .queue()
        .enqueue(draft("orders", "/v1/orders/7", "o"))
        .await
        .unwrap();
    engine.start().await.unwrap();

    assert!(matches!(
        resolved(&mut handle).await,
        OperationOutcome::Failed { .. }
    ));

    let conflict = wait_for_event(&mut events, |e| {
        matches!(e, EngineEvent::Sync(SyncEvent::Conflict { .. }))
    })
    .await;
    match conflict {
        EngineEvent::Sync(SyncEvent::Conflict { operation_id, lane }) => {
            assert_eq!(operation_id, handle.id().as_str());
            assert_eq!(lane, "orders");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    engine.shutdown();
}

#[tokio::test]
async fn expired_credentials_reauth_once_and_replay() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::AuthExpired { status: 401 }),
        Ok(TransportResponse::ok(Bytes::new())),
    ]);
    let reauth = CountingReauth::new(true);
    let config = base_config(transport.clone())
        .reauth(reauth.clone())
        .build()
        .unwrap();
    let engine = engine_with(config).await;

    let mut handle = engine
        .queue()
        .enqueue(draft("cart", "/v1/cart", "a"))
        .await
        .unwrap();
    engine.start().await.unwrap();

    // The requeue does not consume a retry; the replay lands in the same
    // pass.
    assert_eq!(resolved(&mut handle).await, OperationOutcome::Done);
    assert_eq!(reauth.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.request_count().await, 2);
    engine.shutdown();
}

#[tokio::test]
async fn auth_failure_without_reauth_is_terminal() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::AuthExpired {
        status: 401,
    })]);
    let config = base_config(transport.clone()).build().unwrap();
    let engine = engine_with(config).await;

    let mut handle = engine
        .queue()
        .enqueue(draft("cart", "/v1/cart", "a"))
        .await
        .unwrap();
    engine.start().await.unwrap();

    assert!(matches!(
        resolved(&mut handle).await,
        OperationOutcome::Failed { .. }
    ));
    assert_eq!(transport.request_count().await, 1);
    engine.shutdown();
}

// ============================================================================
// Circuit breaking
// ============================================================================

#[tokio::test]
async fn open_circuit_stops_lane_draining() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::ServerError { status: 503 }),
        Err(TransportError::ServerError { status: 503 }),
    ]);
    let config = base_config(transport.clone())
        .max_retries(10)
        .circuit_failure_threshold(2)
        .circuit_cooldown(Duration::from_secs(60))
        .build()
        .unwrap();
    let engine = engine_with(config).await;
    let mut events = engine.subscribe();
    let queue = engine.queue();

    queue.enqueue(draft("cart", "/v1/cart/a", "a")).await.unwrap();
    queue.enqueue(draft("cart", "/v1/cart/b", "b")).await.unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Second failure trips the breaker.
    engine.force_sync();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Third pass is refused locally before any request is sent.
    engine.force_sync();
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            EngineEvent::Sync(SyncEvent::CircuitSkipped { endpoint, .. }) if endpoint == "cart"
        )
    })
    .await;

    assert_eq!(transport.request_count().await, 2);

    // Nothing was lost: both operations are still pending.
    let state = engine.state().await.unwrap();
    assert_eq!(state.pending_operations, 2);
    assert_eq!(
        state.circuits.get("cart"),
        Some(&core_net::CircuitState::Open)
    );
    engine.shutdown();
}

// ============================================================================
// Stale-while-revalidate refresh
// ============================================================================

#[tokio::test]
async fn stale_read_triggers_background_refresh() {
    let transport = ScriptedTransport::new(vec![Ok(TransportResponse::ok(
        Bytes::from_static(b"[fresh]"),
    ))]);
    let config = base_config(transport.clone()).build().unwrap();
    let engine = engine_with(config).await;
    let mut events = engine.subscribe();
    let cache = engine.cache();

    cache
        .put_entry(
            CacheWrite::new(
                "products:list",
                Bytes::from_static(b"[stale]"),
                CachePolicy::stale_while_revalidate(
                    Duration::from_millis(1),
                    Duration::from_secs(3600),
                ),
            )
            .refreshed_from("products", "/v1/products"),
        )
        .await
        .unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The read answers immediately from cache and schedules the refresh.
    let lookup = cache.get("products:list").await;
    assert_eq!(lookup.freshness, Freshness::Stale);
    assert_eq!(lookup.value, Some(Bytes::from_static(b"[stale]")));

    wait_for_event(&mut events, |e| {
        matches!(
            e,
            EngineEvent::Sync(SyncEvent::RefreshCompleted { key }) if key == "products:list"
        )
    })
    .await;

    let lookup = cache.get("products:list").await;
    assert_eq!(lookup.freshness, Freshness::Fresh);
    assert_eq!(lookup.value, Some(Bytes::from_static(b"[fresh]")));

    let requests = transport.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].endpoint, "products");
    assert_eq!(requests[0].path, "/v1/products");
    engine.shutdown();
}

#[tokio::test]
async fn large_refresh_skipped_on_metered_connection() {
    let transport = ScriptedTransport::always_ok();
    let (probe, _probe_tx) = ScriptedProbe::new(ConnectivitySample::online().metered());
    let config = base_config(transport.clone())
        .connectivity_probe(probe)
        .metered_refresh_limit_bytes(8)
        .build()
        .unwrap();
    let engine = engine_with(config).await;
    let mut events = engine.subscribe();
    let cache = engine.cache();

    cache
        .put_entry(
            CacheWrite::new(
                "catalog",
                Bytes::from_static(b"a large cached payload"),
                CachePolicy::stale_while_revalidate(
                    Duration::from_millis(1),
                    Duration::from_secs(3600),
                ),
            )
            .refreshed_from("catalog", "/v1/catalog"),
        )
        .await
        .unwrap();

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(cache.get("catalog").await.freshness, Freshness::Stale);

    let skipped = wait_for_event(&mut events, |e| {
        matches!(e, EngineEvent::Sync(SyncEvent::RefreshSkipped { .. }))
    })
    .await;
    match skipped {
        EngineEvent::Sync(SyncEvent::RefreshSkipped { key, reason }) => {
            assert_eq!(key, "catalog");
            assert_eq!(reason, "metered");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Nothing hit the network; the stale value still serves.
    assert_eq!(transport.request_count().await, 0);
    assert_eq!(cache.get("catalog").await.freshness, Freshness::Stale);
    engine.shutdown();
}

// ============================================================================
// Facade surface
// ============================================================================

#[tokio::test]
async fn successful_mutation_invalidates_dependent_cache() {
    let transport = ScriptedTransport::always_ok();
    let config = base_config(transport.clone()).build().unwrap();
    let engine = engine_with(config).await;
    let cache = engine.cache();

    cache
        .put("cart:summary", Bytes::from_static(b"3 items"), CachePolicy::Forever)
        .await
        .unwrap();
    cache
        .put_entry(
            CacheWrite::new("cart:badge", Bytes::from_static(b"3"), CachePolicy::Dependent)
                .depends_on(["cart:summary"]),
        )
        .await
        .unwrap();

    let mut handle = engine
        .queue()
        .enqueue(draft("cart", "/v1/cart/items", "add-1").invalidates(["cart:summary"]))
        .await
        .unwrap();
    engine.start().await.unwrap();
    assert_eq!(resolved(&mut handle).await, OperationOutcome::Done);

    // The mutation's side effect cascaded through the dependency edge.
    assert_eq!(cache.get("cart:summary").await.freshness, Freshness::Miss);
    assert_eq!(cache.get("cart:badge").await.freshness, Freshness::Miss);
    engine.shutdown();
}

#[tokio::test]
async fn engine_cannot_start_twice() {
    let transport = ScriptedTransport::always_ok();
    let config = base_config(transport).build().unwrap();
    let engine = engine_with(config).await;

    engine.start().await.unwrap();
    assert!(engine.start().await.is_err());
    engine.shutdown();
}

#[tokio::test]
async fn queue_survives_restart() {
    let transport = ScriptedTransport::always_ok();
    let pool = memory_pool().await;

    // First engine accepts work while offline and is shut down.
    let (probe, _tx) = ScriptedProbe::new(ConnectivitySample::offline());
    let config = base_config(transport.clone())
        .connectivity_probe(probe)
        .build()
        .unwrap();
    let engine = OfflineEngine::new(config, pool.clone()).await.unwrap();
    engine
        .queue()
        .enqueue(draft("cart", "/v1/cart", "a"))
        .await
        .unwrap();
    engine.shutdown();
    drop(engine);

    // Second engine over the same storage picks the operation up.
    let config = base_config(transport.clone()).build().unwrap();
    let engine = OfflineEngine::new(config, pool).await.unwrap();
    assert_eq!(engine.state().await.unwrap().pending_operations, 1);

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.state().await.unwrap().pending_operations, 0);
    assert_eq!(transport.request_count().await, 1);
    engine.shutdown();
}
