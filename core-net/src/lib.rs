//! # Core Net
//!
//! Network health machinery for the offline engine: retry backoff with
//! jitter, per-endpoint circuit breaking, and a debounced connectivity
//! monitor over the host's probe.

pub mod circuit;
pub mod monitor;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use monitor::NetworkMonitor;
pub use retry::RetryPolicy;
