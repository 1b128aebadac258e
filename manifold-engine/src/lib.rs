//! # manifold-engine — the flow orchestrator and its satellites
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`orchestrator`] | Work-queue graph traversal, retries, failure edges, run recording |
//! | [`registry`] | `NodeKind → executor` map, extensible at startup |
//! | [`executors`] | Built-in trigger/parse/transform/control/connector/emitter executors |
//! | [`join`] | Correlation-keyed rendezvous with TTL sweeper |
//! | [`poller`] | Remote-directory watchers with fingerprint dedup |
//! | [`worker`] | Queue consumer owning runs from trigger to terminal |
//! | [`report`] | Error report construction for failed runs |
//!
//! Concurrency model: each run is owned by exactly one worker; join and
//! token transitions ride on the storage gateway's conditional writes;
//! poller state is serialized per (flow, node) by the single poller loop.

pub mod executors;
pub mod join;
pub mod orchestrator;
pub mod poller;
pub mod registry;
pub mod report;
pub mod scope;
pub mod worker;

#[cfg(test)]
pub mod test_support;

pub use executors::default_registry;
pub use join::{JoinExecutor, JoinSweeper};
pub use orchestrator::{Orchestrator, RunSeed};
pub use poller::{PollerService, RemoteDir};
pub use registry::{ExecutorRegistry, NodeExecutor, NodeOutcome};
pub use scope::{EngineServices, ExecutionScope, NodeInput};
pub use worker::TriggerWorker;
