//! # Event Bus System
//!
//! Event-driven surface of the offline sync core, built on
//! `tokio::sync::broadcast`. Engine modules publish typed events; hosts
//! subscribe to drive UI indicators such as "N changes pending sync".
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐
//! │ Queue       ├──────────────>│           │
//! └─────────────┘               │           │
//! ┌─────────────┐     emit      │ EventBus  │     subscribe    ┌────────────┐
//! │ Coordinator ├──────────────>│ (broadcast├─────────────────>│ Subscriber │
//! └─────────────┘               │  channel) │                  └────────────┘
//! ┌─────────────┐     emit      │           │     subscribe    ┌────────────┐
//! │ Monitor     ├──────────────>│           ├─────────────────>│ Subscriber │
//! └─────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, EngineEvent, NetworkEvent};
//! use bridge_traits::ConnectivityState;
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(EngineEvent::Network(NetworkEvent::Reconnected))
//!     .ok();
//! ```
//!
//! Slow subscribers receive `RecvError::Lagged(n)`; the bus never blocks a
//! publisher on a lagging consumer.

use bridge_traits::ConnectivityState;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Engine Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    /// Offline queue lifecycle events
    Queue(QueueEvent),
    /// Sync coordinator events
    Sync(SyncEvent),
    /// Cache store events
    Cache(CacheEvent),
    /// Connectivity events
    Network(NetworkEvent),
    /// Circuit breaker transitions
    Circuit(CircuitEvent),
}

impl EngineEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            EngineEvent::Queue(e) => e.description(),
            EngineEvent::Sync(e) => e.description(),
            EngineEvent::Cache(e) => e.description(),
            EngineEvent::Network(e) => e.description(),
            EngineEvent::Circuit(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            EngineEvent::Queue(QueueEvent::Failed { .. }) => EventSeverity::Error,
            EngineEvent::Sync(SyncEvent::Conflict { .. }) => EventSeverity::Error,
            EngineEvent::Circuit(CircuitEvent::Opened { .. }) => EventSeverity::Warning,
            EngineEvent::Network(NetworkEvent::Reconnected) => EventSeverity::Info,
            EngineEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            EngineEvent::Queue(QueueEvent::Done { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Queue Events
// ============================================================================

/// Events related to the durable offline operation queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// Operation accepted into the queue.
    Enqueued {
        operation_id: String,
        lane: String,
        idempotency_key: String,
    },
    /// Enqueue matched an active operation with the same idempotency key;
    /// no duplicate was created.
    Deduplicated {
        operation_id: String,
        idempotency_key: String,
    },
    /// Operation failed retryably and was rescheduled.
    Retrying {
        operation_id: String,
        lane: String,
        retry_count: u32,
        next_attempt_at: i64,
    },
    /// Operation reached a terminal failure.
    Failed {
        operation_id: String,
        lane: String,
        message: String,
        /// Terminal classification ("queue_exhausted", "conflict",
        /// "client_error", "auth").
        reason: String,
    },
    /// Operation completed successfully.
    Done { operation_id: String, lane: String },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::Enqueued { .. } => "Operation enqueued",
            QueueEvent::Deduplicated { .. } => "Enqueue deduplicated by idempotency key",
            QueueEvent::Retrying { .. } => "Operation rescheduled for retry",
            QueueEvent::Failed { .. } => "Operation failed terminally",
            QueueEvent::Done { .. } => "Operation completed",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted by the sync coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A sync pass started ("reconnect", "interval", "forced").
    Started { trigger: String },
    /// A lane finished draining for this pass.
    LaneDrained {
        lane: String,
        completed: u64,
        failed: u64,
    },
    /// The sync pass finished.
    Completed {
        trigger: String,
        operations_completed: u64,
        operations_failed: u64,
    },
    /// A mutation was rejected with a version conflict. Surfaced to the
    /// user; never merged or silently dropped.
    Conflict { operation_id: String, lane: String },
    /// Lane draining stopped because the endpoint's circuit is open.
    CircuitSkipped { endpoint: String, lane: String },
    /// A stale-while-revalidate refresh landed.
    RefreshCompleted { key: String },
    /// A refresh was skipped ("offline", "circuit_open", "metered").
    RefreshSkipped { key: String, reason: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync pass started",
            SyncEvent::LaneDrained { .. } => "Lane drained",
            SyncEvent::Completed { .. } => "Sync pass completed",
            SyncEvent::Conflict { .. } => "Version conflict surfaced",
            SyncEvent::CircuitSkipped { .. } => "Lane skipped, circuit open",
            SyncEvent::RefreshCompleted { .. } => "Cache refresh completed",
            SyncEvent::RefreshSkipped { .. } => "Cache refresh skipped",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events related to cache content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Entry invalidated, with the number of dependents removed in cascade.
    Invalidated { key: String, cascaded: u64 },
    /// Entry evicted under capacity pressure.
    Evicted { key: String, size_bytes: u64 },
    /// A versioned/ETag entry was re-marked fresh without a payload
    /// transfer.
    Revalidated { key: String },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Invalidated { .. } => "Cache entry invalidated",
            CacheEvent::Evicted { .. } => "Cache entry evicted",
            CacheEvent::Revalidated { .. } => "Cache entry revalidated",
        }
    }
}

// ============================================================================
// Network Events
// ============================================================================

/// Connectivity transitions published by the network monitor, after
/// debouncing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// Debounced connectivity state change.
    ConnectivityChanged { state: ConnectivityState },
    /// One-shot transition into Online from Offline/Limited.
    Reconnected,
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::ConnectivityChanged { .. } => "Connectivity changed",
            NetworkEvent::Reconnected => "Connectivity restored",
        }
    }
}

// ============================================================================
// Circuit Events
// ============================================================================

/// Circuit breaker state transitions, per endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CircuitEvent {
    /// Failure threshold exceeded; requests to the endpoint are now
    /// short-circuited.
    Opened { endpoint: String, cooldown_ms: u64 },
    /// Cooldown elapsed; a single probe is permitted.
    HalfOpened { endpoint: String },
    /// Probe succeeded; normal traffic resumed.
    Closed { endpoint: String },
}

impl CircuitEvent {
    fn description(&self) -> &str {
        match self {
            CircuitEvent::Opened { .. } => "Circuit opened",
            CircuitEvent::HalfOpened { .. } => "Circuit half-open",
            CircuitEvent::Closed { .. } => "Circuit closed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to engine events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// When a subscriber falls behind by more than `capacity` events, it
    /// receives a `RecvError::Lagged` error instead of the missed events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are no active subscribers. Emission failures are
    /// never fatal; callers use `.ok()`.
    pub fn emit(&self, event: EngineEvent) -> Result<usize, SendError<EngineEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all
    /// future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&EngineEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, EngineEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut queue_stream = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, EngineEvent::Queue(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<EngineEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<EngineEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter; only matching events are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EngineEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events, `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<EngineEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<EngineEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
