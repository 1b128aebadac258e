//! Trigger executors: the seed payload is already the trigger's output, so
//! all trigger kinds share a passthrough executor.

use async_trait::async_trait;

use manifold_core::model::flow::Node;
use manifold_core::EngineError;

use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    async fn execute(
        &self,
        _node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        Ok(NodeOutcome::Advance(input.payload))
    }
}
