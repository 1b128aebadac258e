//! # manifold-core — shared types for the Manifold integration engine
//!
//! This crate holds everything the other Manifold crates agree on:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`model`] | Flow graphs, run records, join/poller state, token cache rows, secrets, adapters |
//! | [`error`] | The engine-wide error taxonomy (`ErrorKind`) and `EngineError` |
//! | [`record`] | Helpers for the opaque JSON payloads that travel along flow edges |
//! | [`config`] | `EngineConfig` loaded from environment variables at startup |
//!
//! Payloads are deliberately untyped (`serde_json::Value`): executors declare
//! their expected shape through per-node configuration and fail with
//! `ErrorKind::Validation` when the shape does not hold.

pub mod config;
pub mod error;
pub mod model;
pub mod record;

pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, ErrorKind};

/// Re-exports of the most commonly used core types.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{EngineError, ErrorKind};
    pub use crate::model::flow::{Edge, Flow, Node, NodeKind, RetryPolicy};
    pub use crate::model::run::{FlowRun, NodeExecution, NodeExecutionStatus, RunStatus, TriggeredBy};
    pub use crate::model::trigger::TriggerEvent;
}
