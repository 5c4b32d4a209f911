//! Connectivity Probe Abstraction
//!
//! Raw, transport-level connectivity as reported by the host platform.
//! Samples from the probe are noisy on flapping connections; the engine's
//! `NetworkMonitor` debounces them before anything reacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connectivity state as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// No usable network path
    Offline,
    /// Network present but degraded (captive portal, constrained radio)
    Limited,
    /// Full connectivity
    Online,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// A raw connectivity sample from the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySample {
    pub state: ConnectivityState,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl ConnectivitySample {
    pub fn online() -> Self {
        Self {
            state: ConnectivityState::Online,
            is_metered: false,
        }
    }

    pub fn offline() -> Self {
        Self {
            state: ConnectivityState::Offline,
            is_metered: false,
        }
    }

    pub fn metered(mut self) -> Self {
        self.is_metered = true;
        self
    }
}

/// Connectivity probe trait
///
/// Hosts implement this over their native reachability APIs
/// (NetworkManager, NWPathMonitor, ConnectivityManager). `current()` must
/// never block on a network round trip.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Current raw sample.
    async fn current(&self) -> ConnectivitySample;

    /// Next raw change, if the platform pushes them. Polling-only hosts may
    /// pend forever here; the monitor re-reads `current()` on its own timer.
    async fn next_change(&self) -> ConnectivitySample;
}
