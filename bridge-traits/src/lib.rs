//! # Collaborator Bridge Traits
//!
//! Contracts between the offline sync core and everything it cannot own:
//! the network, the wall clock, connectivity detection, and
//! re-authentication. Each trait represents a capability the engine
//! requires but that must be implemented by the host application.
//!
//! ## Traits
//!
//! - [`Transport`](transport::Transport) - single request/response exchange
//! - [`ReauthProvider`](transport::ReauthProvider) - credential refresh on `AuthExpired`
//! - [`ConnectivityProbe`](network::ConnectivityProbe) - raw connectivity samples
//! - [`Clock`](time::Clock) - injectable time source for deterministic testing
//!
//! ## Error Handling
//!
//! Transport implementations map native failures onto the
//! [`TransportError`](error::TransportError) taxonomy; the engine's retry,
//! circuit-breaker, and re-auth behavior is driven entirely by that enum.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; implementations are shared across
//! async tasks behind `Arc`.

pub mod error;
pub mod network;
pub mod time;
pub mod transport;

pub use error::TransportError;

// Re-export commonly used types
pub use network::{ConnectivityProbe, ConnectivitySample, ConnectivityState};
pub use time::{Clock, ManualClock, SystemClock};
pub use transport::{Method, ReauthProvider, Transport, TransportRequest, TransportResponse};
