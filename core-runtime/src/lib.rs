//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the offline sync core:
//! - Logging and tracing infrastructure
//! - Engine configuration with fail-fast validation
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other engine modules
//! depend on. It establishes the logging conventions, event broadcasting
//! mechanism, and the explicit-instance configuration pattern used
//! throughout the system: collaborators are injected through
//! [`config::EngineConfig`], never reached through ambient globals.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus, EventStream};
