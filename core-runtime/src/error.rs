//! Runtime-level errors.
//!
//! These cover engine construction and wiring; each functional crate
//! (cache, queue, net, sync) carries its own error type for its domain.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A tunable was rejected at build time, or logging could not be
    /// initialized.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required host collaborator was not injected.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
