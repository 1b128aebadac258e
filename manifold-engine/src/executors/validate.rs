//! Schema validation executor.
//!
//! Validates the input payload against the JSON Schema in the node config.
//! `strict` mode fails on the first violation; `lenient` collects every
//! violation into one error message. Either way a violation is kind
//! `validation` and the payload passes through unchanged on success.

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;

use manifold_core::model::flow::Node;
use manifold_core::EngineError;

use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

pub struct SchemaValidatorExecutor;

fn describe(error: &jsonschema::ValidationError<'_>) -> String {
    let path = error.instance_path.to_string();
    if path.is_empty() {
        error.to_string()
    } else {
        format!("{path}: {error}")
    }
}

#[async_trait]
impl NodeExecutor for SchemaValidatorExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let schema_value = node
            .config
            .get("schema")
            .ok_or_else(|| EngineError::validation("validator missing 'schema'"))?;
        let lenient = node
            .config
            .get("mode")
            .and_then(Value::as_str)
            .map(|m| m.eq_ignore_ascii_case("lenient"))
            .unwrap_or(false);

        let compiled = JSONSchema::compile(schema_value)
            .map_err(|e| EngineError::validation(format!("invalid schema: {e}")))?;

        let outcome = match compiled.validate(&input.payload) {
            Ok(()) => Ok(NodeOutcome::Advance(input.payload.clone())),
            Err(errors) => {
                let message = if lenient {
                    errors.map(|e| describe(&e)).collect::<Vec<_>>().join("; ")
                } else {
                    errors
                        .into_iter()
                        .next()
                        .map(|e| describe(&e))
                        .unwrap_or_else(|| "schema violation".to_string())
                };
                Err(EngineError::validation(message))
            }
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(mode: &str) -> Node {
        Node {
            id: "validate".into(),
            kind: manifold_core::model::flow::NodeKind::SchemaValidator,
            name: None,
            config: json!({
                "mode": mode,
                "schema": {
                    "type": "object",
                    "required": ["order_id", "amount"],
                    "properties": {
                        "order_id": {"type": "string"},
                        "amount": {"type": "number"},
                    },
                },
            }),
            adapter_id: None,
            retry: None,
        }
    }

    async fn run(mode: &str, input: Value) -> Result<NodeOutcome, EngineError> {
        SchemaValidatorExecutor
            .execute(
                &validator(mode),
                NodeInput::seed(input),
                &crate::test_support::scope(),
            )
            .await
    }

    #[tokio::test]
    async fn valid_payload_passes_through() {
        let outcome = run("strict", json!({"order_id": "A", "amount": 10}))
            .await
            .unwrap();
        match outcome {
            NodeOutcome::Advance(v) => assert_eq!(v["order_id"], "A"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn strict_mode_reports_first_error() {
        let err = run("strict", json!({"amount": "ten"})).await.unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Validation);
        // One violation only, even though two exist.
        assert!(!err.message.contains("; "), "{}", err.message);
    }

    #[tokio::test]
    async fn lenient_mode_collects_all_errors() {
        let err = run("lenient", json!({"amount": "ten"})).await.unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Validation);
        assert!(err.message.contains("; "), "{}", err.message);
    }
}
