//! # Core Sync
//!
//! The top of the offline engine: the [`SyncCoordinator`] that drains
//! queue lanes and lands cache refreshes, and the [`OfflineEngine`]
//! facade hosts construct from an `EngineConfig`.

pub mod coordinator;
pub mod engine;
pub mod error;

pub use coordinator::{CoordinatorConfig, SyncCoordinator};
pub use engine::{EngineState, OfflineEngine};
pub use error::{Result, SyncError};
