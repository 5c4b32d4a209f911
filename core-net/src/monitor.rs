//! Debounced connectivity monitor.
//!
//! Wraps the host's [`ConnectivityProbe`] and publishes a stable
//! connectivity state: a raw change is only published after it has held
//! for the settle window, so interface flaps don't thrash the sync
//! machinery. An Offline/Limited to Online transition additionally fires
//! a one-shot reconnect notification that triggers a sync pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bridge_traits::{ConnectivityProbe, ConnectivitySample, ConnectivityState};
use core_runtime::events::{EngineEvent, NetworkEvent};
use core_runtime::EventBus;

/// How often `current()` is re-read when the probe pushes nothing.
/// Polling-only probes leave `next_change` pending forever.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Connectivity publisher with flap debouncing.
pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    events: EventBus,
    settle_window: Duration,
    state_tx: watch::Sender<ConnectivityState>,
    metered: AtomicBool,
    reconnect: Notify,
}

impl NetworkMonitor {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        events: EventBus,
        settle_window: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Offline);
        Self {
            probe,
            events,
            settle_window,
            state_tx,
            metered: AtomicBool::new(false),
            reconnect: Notify::new(),
        }
    }

    /// Latest debounced state.
    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// Watch the debounced state for changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Whether the latest sample reported a metered connection.
    pub fn is_metered(&self) -> bool {
        self.metered.load(Ordering::Relaxed)
    }

    /// Wait for the next reconnect notification.
    pub async fn wait_reconnect(&self) {
        self.reconnect.notified().await;
    }

    /// Sample the probe until cancelled. The initial sample is applied
    /// without debouncing; every later raw change must hold stable for
    /// the settle window before it is published. Between pushed changes
    /// the probe is polled on a timer, so probes that only answer
    /// `current()` still drive state transitions.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let initial = self.probe.current().await;
        self.apply(initial);

        loop {
            let raw = tokio::select! {
                _ = cancel.cancelled() => return,
                sample = self.probe.next_change() => sample,
                _ = tokio::time::sleep(POLL_INTERVAL) => self.probe.current().await,
            };

            // Debounce: keep absorbing newer samples until one holds for
            // the settle window.
            let mut candidate = raw;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sample = self.probe.next_change() => {
                        debug!(state = ?sample.state, "Connectivity changed again within settle window");
                        candidate = sample;
                    }
                    _ = tokio::time::sleep(self.settle_window) => break,
                }
            }

            self.apply(candidate);
        }
    }

    fn apply(&self, sample: ConnectivitySample) {
        self.metered.store(sample.is_metered, Ordering::Relaxed);

        let previous = *self.state_tx.borrow();
        if previous == sample.state {
            return;
        }

        info!(from = ?previous, to = ?sample.state, "Connectivity state changed");
        self.state_tx.send(sample.state).ok();
        self.events
            .emit(EngineEvent::Network(NetworkEvent::ConnectivityChanged {
                state: sample.state,
            }))
            .ok();

        if !previous.is_online() && sample.state.is_online() {
            // notify_one buffers a permit, so a reconnect that fires
            // before the coordinator is polling is not lost.
            self.reconnect.notify_one();
            self.events
                .emit(EngineEvent::Network(NetworkEvent::Reconnected))
                .ok();
        }
    }
}
