//! Egress emitters: terminal nodes that hand the payload to the outside
//! world and propagate nothing.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use manifold_core::model::flow::Node;
use manifold_core::record::get_path;
use manifold_core::EngineError;

use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

/// Topic outbound mail rides on; an SMTP consumer drains it.
pub const EMAIL_TOPIC: &str = "egress.email";

pub struct EgressExecutor;

#[async_trait]
impl NodeExecutor for EgressExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let channel = node
            .config
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("log");

        match channel {
            "log" => {
                info!(
                    flow = %scope.flow_name,
                    run_id = %scope.run_id,
                    trace_id = %scope.trace_id,
                    node_id = %node.id,
                    payload = %input.payload,
                    "egress"
                );
                Ok(NodeOutcome::Halt(input.payload))
            }
            "webhook" => {
                let url = node
                    .config
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::validation("webhook egress missing 'url'"))?;
                if scope.emulation {
                    return Ok(NodeOutcome::Halt(json!({
                        "emulated": true,
                        "delivered_to": url,
                    })));
                }
                let response = scope
                    .services
                    .http
                    .post(url)
                    .timeout(scope.node_timeout)
                    .header("X-Trace-Id", scope.trace_id.clone())
                    .json(&input.payload)
                    .send()
                    .await
                    .map_err(|e| EngineError::connection(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(EngineError::new(
                        manifold_core::ErrorKind::from_http_status(response.status().as_u16()),
                        format!("webhook egress returned {}", response.status()),
                    ));
                }
                debug!(url, "webhook egress delivered");
                Ok(NodeOutcome::Halt(input.payload))
            }
            "email" => {
                let to = node
                    .config
                    .get("to")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::validation("email egress missing 'to'"))?;
                let subject = node
                    .config
                    .get("subject")
                    .and_then(Value::as_str)
                    .unwrap_or("Manifold notification");
                let body = match node.config.get("body_path").and_then(Value::as_str) {
                    Some(path) => get_path(&input.payload, path)
                        .cloned()
                        .unwrap_or(Value::Null),
                    None => input.payload.clone(),
                };
                let message = json!({
                    "to": to,
                    "subject": subject,
                    "body": body,
                    "trace_id": scope.trace_id,
                });
                if scope.emulation {
                    return Ok(NodeOutcome::Halt(message));
                }
                scope
                    .services
                    .queue
                    .enqueue(EMAIL_TOPIC, message.clone())
                    .await
                    .map_err(|e| EngineError::connection(e.to_string()))?;
                Ok(NodeOutcome::Halt(message))
            }
            other => Err(EngineError::validation(format!(
                "unknown egress channel '{other}'"
            ))),
        }
    }
}
