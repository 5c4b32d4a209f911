//! Per-endpoint circuit breaker.
//!
//! Protects a struggling endpoint from a retry storm: after enough
//! failures inside a sliding window the circuit opens and requests are
//! short-circuited locally. After a cooldown a single probe is allowed
//! through; its outcome either closes the circuit or reopens it with a
//! doubled (capped) cooldown.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use bridge_traits::Clock;
use core_runtime::events::{CircuitEvent, EngineEvent};
use core_runtime::EventBus;

/// Circuit state per endpoint.
///
/// ```text
/// Closed ──threshold failures in window──> Open
///   ↑                                       │ cooldown elapsed
///   │ probe success                         ↓
///   └──────────────────────────────── HalfOpen
///                  probe failure: Open, cooldown doubled (capped)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal traffic; failures are counted.
    Closed,
    /// Requests are short-circuited until the cooldown elapses.
    Open,
    /// One probe request is allowed through.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that trip the circuit.
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted.
    pub window: Duration,
    /// Initial cooldown after opening.
    pub cooldown: Duration,
    /// Upper bound for the doubling cooldown.
    pub cooldown_cap: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(10),
            cooldown_cap: Duration::from_secs(300),
        }
    }
}

struct EndpointCircuit {
    state: CircuitState,
    /// Failure timestamps (epoch ms) inside the sliding window.
    failures: VecDeque<i64>,
    /// When the circuit last opened (epoch ms).
    opened_at: i64,
    /// Current cooldown; doubles on each failed probe.
    cooldown_ms: u64,
    /// Whether the single half-open probe has been handed out.
    probe_in_flight: bool,
}

impl EndpointCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: 0,
            cooldown_ms: 0,
            probe_in_flight: false,
        }
    }

    fn prune_window(&mut self, now_ms: i64, window_ms: i64) {
        while let Some(&oldest) = self.failures.front() {
            if now_ms - oldest > window_ms {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Registry of per-endpoint circuits. Circuits are created lazily on the
/// first recorded outcome and live in memory only.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    circuits: Mutex<HashMap<String, EndpointCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self {
            config,
            clock,
            events,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request to the endpoint may proceed.
    ///
    /// An open circuit whose cooldown has elapsed transitions to HalfOpen
    /// and hands out exactly one probe.
    pub async fn allow_request(&self, endpoint: &str) -> bool {
        let now = self.clock.now_ms();
        let mut circuits = self.circuits.lock().await;
        let Some(circuit) = circuits.get_mut(endpoint) else {
            // No recorded outcomes yet; endpoint is assumed healthy.
            return true;
        };

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now >= circuit.opened_at + circuit.cooldown_ms as i64 {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    debug!(endpoint, "Circuit half-open, probe allowed");
                    self.events
                        .emit(EngineEvent::Circuit(CircuitEvent::HalfOpened {
                            endpoint: endpoint.to_string(),
                        }))
                        .ok();
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    false
                } else {
                    circuit.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful outcome for the endpoint.
    pub async fn record_success(&self, endpoint: &str) {
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits
            .entry(endpoint.to_string())
            .or_insert_with(EndpointCircuit::new);

        circuit.probe_in_flight = false;
        if circuit.state == CircuitState::HalfOpen {
            circuit.state = CircuitState::Closed;
            circuit.failures.clear();
            circuit.cooldown_ms = 0;
            info!(endpoint, "Circuit closed after successful probe");
            self.events
                .emit(EngineEvent::Circuit(CircuitEvent::Closed {
                    endpoint: endpoint.to_string(),
                }))
                .ok();
        }
    }

    /// Record a failed outcome for the endpoint.
    pub async fn record_failure(&self, endpoint: &str) {
        let now = self.clock.now_ms();
        let mut circuits = self.circuits.lock().await;
        let circuit = circuits
            .entry(endpoint.to_string())
            .or_insert_with(EndpointCircuit::new);

        match circuit.state {
            CircuitState::HalfOpen => {
                // Probe failed: reopen with a doubled cooldown.
                let doubled = (circuit.cooldown_ms * 2)
                    .min(self.config.cooldown_cap.as_millis() as u64);
                circuit.state = CircuitState::Open;
                circuit.opened_at = now;
                circuit.cooldown_ms = doubled;
                circuit.probe_in_flight = false;
                warn!(endpoint, cooldown_ms = doubled, "Circuit reopened after failed probe");
                self.events
                    .emit(EngineEvent::Circuit(CircuitEvent::Opened {
                        endpoint: endpoint.to_string(),
                        cooldown_ms: doubled,
                    }))
                    .ok();
            }
            CircuitState::Closed => {
                circuit.prune_window(now, self.config.window.as_millis() as i64);
                circuit.failures.push_back(now);
                if circuit.failures.len() as u32 >= self.config.failure_threshold {
                    let cooldown_ms = self.config.cooldown.as_millis() as u64;
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = now;
                    circuit.cooldown_ms = cooldown_ms;
                    circuit.failures.clear();
                    warn!(endpoint, cooldown_ms, "Circuit opened");
                    self.events
                        .emit(EngineEvent::Circuit(CircuitEvent::Opened {
                            endpoint: endpoint.to_string(),
                            cooldown_ms,
                        }))
                        .ok();
                }
            }
            // Failures while already open carry no new information.
            CircuitState::Open => {}
        }
    }

    /// Per-endpoint states, for the aggregate engine state.
    pub async fn snapshot(&self) -> HashMap<String, CircuitState> {
        self.circuits
            .lock()
            .await
            .iter()
            .map(|(endpoint, circuit)| (endpoint.clone(), circuit.state))
            .collect()
    }
}
