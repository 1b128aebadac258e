//! Node executor registry: one executor per [`NodeKind`], registered at
//! startup. Duplicate registrations are a programming error and fail
//! fatally before the engine serves traffic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use manifold_core::model::flow::{Node, NodeKind};
use manifold_core::EngineError;

use crate::scope::{ExecutionScope, NodeInput};

/// What a node execution produced and how it routes.
#[derive(Clone, Debug)]
pub enum NodeOutcome {
    /// Propagate the payload along every outgoing edge in definition order.
    Advance(Value),
    /// Propagate only along edges whose label matches (case-insensitive).
    Routed { payload: Value, label: String },
    /// Nothing to propagate now — a join waiting for its other stream.
    Pending,
    /// Terminal emitter: record the output, propagate no edges.
    Halt(Value),
}

impl NodeOutcome {
    /// The recorded node output, when there is one.
    pub fn output(&self) -> Option<&Value> {
        match self {
            NodeOutcome::Advance(v) | NodeOutcome::Halt(v) => Some(v),
            NodeOutcome::Routed { payload, .. } => Some(payload),
            NodeOutcome::Pending => None,
        }
    }
}

/// A pure function from (config, input, context) to an outcome, possibly
/// performing I/O. Executors that perform I/O must honor the scope's
/// timeout and cancellation.
#[async_trait]
pub trait NodeExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError>;
}

/// Maps node type tags to executors. Extensible at startup only.
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor for a kind.
    ///
    /// # Panics
    ///
    /// Panics on duplicate registration — a misconfigured registry must not
    /// reach serving.
    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) -> &mut Self {
        if self.executors.insert(kind, executor).is_some() {
            panic!("duplicate executor registration for {kind:?}");
        }
        self
    }

    pub fn executor_for(&self, kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
