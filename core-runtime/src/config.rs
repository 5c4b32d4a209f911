//! # Engine Configuration
//!
//! Builder for the engine's injected collaborators and tunables. The engine
//! is constructed as an explicit instance holding its collaborators; there
//! is no ambient global state. Validation is fail-fast: a missing required
//! collaborator produces an actionable `CapabilityMissing` error at build
//! time, not a panic at first use.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::builder()
//!     .transport(Arc::new(MyTransport::new()))
//!     .connectivity_probe(Arc::new(MyProbe::new()))
//!     .cache_budget_bytes(32 * 1024 * 1024)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, ConnectivityProbe, ReauthProvider, SystemClock, Transport};
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration.
///
/// Holds all collaborators and settings required to construct the engine.
/// Use [`EngineConfigBuilder`] to create instances.
#[derive(Clone)]
pub struct EngineConfig {
    /// Transport collaborator performing single request/response exchanges
    /// (required)
    pub transport: Arc<dyn Transport>,

    /// Raw connectivity source (optional; without one the engine assumes
    /// an online, unmetered connection)
    pub connectivity_probe: Option<Arc<dyn ConnectivityProbe>>,

    /// Re-authentication facility invoked on AuthExpired (optional)
    pub reauth: Option<Arc<dyn ReauthProvider>>,

    /// Time source (defaults to the system clock)
    pub clock: Arc<dyn Clock>,

    /// Cache capacity budget in bytes
    pub cache_budget_bytes: usize,

    /// Per-request timeout; an elapsed request counts as a retryable
    /// timeout failure
    pub request_timeout: Duration,

    /// Interval between periodic sync passes
    pub sync_interval: Duration,

    /// How long a raw connectivity state must hold before it is published
    pub settle_window: Duration,

    /// Base backoff delay
    pub retry_base: Duration,

    /// Backoff upper bound
    pub retry_cap: Duration,

    /// Default retry budget per operation
    pub max_retries: u32,

    /// Retry budget for payment-class operations
    pub payment_max_retries: u32,

    /// Consecutive failures within the window that open a circuit
    pub circuit_failure_threshold: u32,

    /// Sliding failure window
    pub circuit_window: Duration,

    /// Initial open-state cooldown
    pub circuit_cooldown: Duration,

    /// Upper bound on escalated cooldowns
    pub circuit_cooldown_cap: Duration,

    /// Stale refreshes larger than this are skipped on metered connections
    pub metered_refresh_limit_bytes: usize,

    /// Event bus buffer size
    pub event_buffer_size: usize,
}

impl EngineConfig {
    /// Creates a new builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

// Collaborators are trait objects without Debug bounds; print their
// presence and the tunables.
impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("connectivity_probe", &self.connectivity_probe.is_some())
            .field("reauth", &self.reauth.is_some())
            .field("cache_budget_bytes", &self.cache_budget_bytes)
            .field("request_timeout", &self.request_timeout)
            .field("sync_interval", &self.sync_interval)
            .field("settle_window", &self.settle_window)
            .field("retry_base", &self.retry_base)
            .field("retry_cap", &self.retry_cap)
            .field("max_retries", &self.max_retries)
            .field("payment_max_retries", &self.payment_max_retries)
            .field("circuit_failure_threshold", &self.circuit_failure_threshold)
            .field("circuit_window", &self.circuit_window)
            .field("circuit_cooldown", &self.circuit_cooldown)
            .field("circuit_cooldown_cap", &self.circuit_cooldown_cap)
            .field(
                "metered_refresh_limit_bytes",
                &self.metered_refresh_limit_bytes,
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .finish_non_exhaustive()
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    transport: Option<Arc<dyn Transport>>,
    connectivity_probe: Option<Arc<dyn ConnectivityProbe>>,
    reauth: Option<Arc<dyn ReauthProvider>>,
    clock: Option<Arc<dyn Clock>>,
    cache_budget_bytes: usize,
    request_timeout: Duration,
    sync_interval: Duration,
    settle_window: Duration,
    retry_base: Duration,
    retry_cap: Duration,
    max_retries: u32,
    payment_max_retries: u32,
    circuit_failure_threshold: u32,
    circuit_window: Duration,
    circuit_cooldown: Duration,
    circuit_cooldown_cap: Duration,
    metered_refresh_limit_bytes: usize,
    event_buffer_size: usize,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            connectivity_probe: None,
            reauth: None,
            clock: None,
            cache_budget_bytes: 32 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            sync_interval: Duration::from_secs(60),
            settle_window: Duration::from_secs(2),
            retry_base: Duration::from_millis(500),
            retry_cap: Duration::from_secs(30),
            max_retries: 3,
            payment_max_retries: 1,
            circuit_failure_threshold: 5,
            circuit_window: Duration::from_secs(30),
            circuit_cooldown: Duration::from_secs(10),
            circuit_cooldown_cap: Duration::from_secs(300),
            metered_refresh_limit_bytes: 64 * 1024,
            event_buffer_size: 100,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connectivity_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity_probe = Some(probe);
        self
    }

    pub fn reauth(mut self, reauth: Arc<dyn ReauthProvider>) -> Self {
        self.reauth = Some(reauth);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cache_budget_bytes(mut self, bytes: usize) -> Self {
        self.cache_budget_bytes = bytes;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn settle_window(mut self, window: Duration) -> Self {
        self.settle_window = window;
        self
    }

    pub fn retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn retry_cap(mut self, cap: Duration) -> Self {
        self.retry_cap = cap;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn payment_max_retries(mut self, retries: u32) -> Self {
        self.payment_max_retries = retries;
        self
    }

    pub fn circuit_failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit_failure_threshold = threshold;
        self
    }

    pub fn circuit_window(mut self, window: Duration) -> Self {
        self.circuit_window = window;
        self
    }

    pub fn circuit_cooldown(mut self, cooldown: Duration) -> Self {
        self.circuit_cooldown = cooldown;
        self
    }

    pub fn circuit_cooldown_cap(mut self, cap: Duration) -> Self {
        self.circuit_cooldown_cap = cap;
        self
    }

    pub fn metered_refresh_limit_bytes(mut self, bytes: usize) -> Self {
        self.metered_refresh_limit_bytes = bytes;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityMissing` when a required collaborator was not
    /// provided, and `Config` for out-of-range tunables.
    pub fn build(self) -> Result<EngineConfig> {
        let transport = self.transport.ok_or_else(|| Error::CapabilityMissing {
            capability: "Transport".to_string(),
            message: "No transport implementation provided. Inject the host's \
                      network client before building the engine."
                .to_string(),
        })?;

        if self.cache_budget_bytes == 0 {
            return Err(Error::Config(
                "cache_budget_bytes must be greater than zero".to_string(),
            ));
        }

        if self.retry_cap < self.retry_base {
            return Err(Error::Config(
                "retry_cap must be at least retry_base".to_string(),
            ));
        }

        if self.circuit_failure_threshold == 0 {
            return Err(Error::Config(
                "circuit_failure_threshold must be greater than zero".to_string(),
            ));
        }

        Ok(EngineConfig {
            transport,
            connectivity_probe: self.connectivity_probe,
            reauth: self.reauth,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            cache_budget_bytes: self.cache_budget_bytes,
            request_timeout: self.request_timeout,
            sync_interval: self.sync_interval,
            settle_window: self.settle_window,
            retry_base: self.retry_base,
            retry_cap: self.retry_cap,
            max_retries: self.max_retries,
            payment_max_retries: self.payment_max_retries,
            circuit_failure_threshold: self.circuit_failure_threshold,
            circuit_window: self.circuit_window,
            circuit_cooldown: self.circuit_cooldown,
            circuit_cooldown_cap: self.circuit_cooldown_cap,
            metered_refresh_limit_bytes: self.metered_refresh_limit_bytes,
            event_buffer_size: self.event_buffer_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{TransportRequest, TransportResponse};

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send(
            &self,
            _request: TransportRequest,
        ) -> bridge_traits::error::Result<TransportResponse> {
            Ok(TransportResponse::ok(bytes::Bytes::new()))
        }
    }

    #[test]
    fn build_requires_transport() {
        let err = EngineConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::CapabilityMissing { capability, .. } if capability == "Transport"));
    }

    #[test]
    fn build_with_defaults() {
        let config = EngineConfig::builder()
            .transport(Arc::new(NoopTransport))
            .build()
            .unwrap();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.payment_max_retries, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.connectivity_probe.is_none());
    }

    #[test]
    fn debug_output_shows_tunables_and_collaborator_presence() {
        let config = EngineConfig::builder()
            .transport(Arc::new(NoopTransport))
            .build()
            .unwrap();

        let rendered = format!("{config:?}");
        assert!(rendered.contains("connectivity_probe: false"));
        assert!(rendered.contains("max_retries: 3"));
    }

    #[test]
    fn build_rejects_zero_budget() {
        let err = EngineConfig::builder()
            .transport(Arc::new(NoopTransport))
            .cache_budget_bytes(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn build_rejects_cap_below_base() {
        let err = EngineConfig::builder()
            .transport(Arc::new(NoopTransport))
            .retry_base(Duration::from_secs(10))
            .retry_cap(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
