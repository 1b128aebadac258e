//! Object mapper: declarative source→target path mapping with optional
//! per-field transformations.
//!
//! ```json
//! {
//!   "mappings": [
//!     {"source": "customer.name", "target": "name", "transform": "uppercase"},
//!     {"source": "total", "target": "amount", "transform": "number"},
//!     {"source": "missing", "target": "region", "default": "EU"}
//!   ],
//!   "keep_unmapped": false
//! }
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};

use manifold_core::model::flow::Node;
use manifold_core::record::{get_path, set_path};
use manifold_core::EngineError;

use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

pub struct ObjectMapperExecutor;

fn apply_transform(value: Value, transform: &str) -> Result<Value, EngineError> {
    Ok(match transform {
        "uppercase" => match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        },
        "lowercase" => match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        },
        "trim" => match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        },
        "number" => match &value {
            Value::Number(_) => value,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| {
                    EngineError::transformation(format!("'{s}' is not a number"))
                })?,
            _ => {
                return Err(EngineError::transformation(
                    "cannot convert value to number",
                ))
            }
        },
        "string" => match value {
            Value::String(_) => value,
            other => Value::String(other.to_string()),
        },
        other => {
            // Concatenations carry their operand: "prefix:ORD-", "suffix:-EU".
            if let Some(prefix) = other.strip_prefix("prefix:") {
                return Ok(match value {
                    Value::String(s) => Value::String(format!("{prefix}{s}")),
                    v => Value::String(format!("{prefix}{v}")),
                });
            }
            if let Some(suffix) = other.strip_prefix("suffix:") {
                return Ok(match value {
                    Value::String(s) => Value::String(format!("{s}{suffix}")),
                    v => Value::String(format!("{v}{suffix}")),
                });
            }
            return Err(EngineError::validation(format!(
                "unknown transform '{other}'"
            )));
        }
    })
}

#[async_trait]
impl NodeExecutor for ObjectMapperExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let mappings = node
            .config
            .get("mappings")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::validation("mapper missing 'mappings'"))?;
        let keep_unmapped = node
            .config
            .get("keep_unmapped")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut output = if keep_unmapped {
            input.payload.clone()
        } else {
            Value::Object(Map::new())
        };

        for mapping in mappings {
            let source = mapping
                .get("source")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::validation("mapping missing 'source'"))?;
            let target = mapping
                .get("target")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::validation("mapping missing 'target'"))?;

            let value = match get_path(&input.payload, source) {
                Some(v) => v.clone(),
                None => match mapping.get("default") {
                    Some(default) => default.clone(),
                    None => continue,
                },
            };
            let value = match mapping.get("transform").and_then(Value::as_str) {
                Some(transform) => apply_transform(value, transform)?,
                None => value,
            };
            set_path(&mut output, target, value);
        }
        Ok(NodeOutcome::Advance(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper_node(config: Value) -> Node {
        Node {
            id: "map".into(),
            kind: manifold_core::model::flow::NodeKind::ObjectMapper,
            name: None,
            config,
            adapter_id: None,
            retry: None,
        }
    }

    async fn run(config: Value, input: Value) -> Result<Value, EngineError> {
        let outcome = ObjectMapperExecutor
            .execute(
                &mapper_node(config),
                NodeInput::seed(input),
                &crate::test_support::scope(),
            )
            .await?;
        match outcome {
            NodeOutcome::Advance(v) => Ok(v),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn maps_nested_paths_with_transforms() {
        let out = run(
            json!({"mappings": [
                {"source": "customer.name", "target": "name", "transform": "uppercase"},
                {"source": "order.total", "target": "billing.amount", "transform": "number"},
            ]}),
            json!({"customer": {"name": "ada"}, "order": {"total": "12.5"}}),
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"name": "ADA", "billing": {"amount": 12.5}}));
    }

    #[tokio::test]
    async fn missing_source_uses_default_or_skips() {
        let out = run(
            json!({"mappings": [
                {"source": "region", "target": "region", "default": "EU"},
                {"source": "ghost", "target": "ghost"},
            ]}),
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"region": "EU"}));
    }

    #[tokio::test]
    async fn keep_unmapped_preserves_input_fields() {
        let out = run(
            json!({"keep_unmapped": true, "mappings": [
                {"source": "a", "target": "b"},
            ]}),
            json!({"a": 1, "c": 3}),
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"a": 1, "b": 1, "c": 3}));
    }

    #[tokio::test]
    async fn bad_number_is_transformation_error() {
        let err = run(
            json!({"mappings": [
                {"source": "total", "target": "n", "transform": "number"},
            ]}),
            json!({"total": "twelve"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Transformation);
    }

    #[tokio::test]
    async fn concat_transforms_carry_their_operand() {
        let out = run(
            json!({"mappings": [
                {"source": "n", "target": "ref", "transform": "prefix:ORD-"},
                {"source": "region", "target": "zone", "transform": "suffix:-ZONE"},
            ]}),
            json!({"n": "1042", "region": "EU"}),
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"ref": "ORD-1042", "zone": "EU-ZONE"}));
    }

    #[tokio::test]
    async fn string_transform_stringifies() {
        let out = run(
            json!({"mappings": [
                {"source": "n", "target": "s", "transform": "string"},
            ]}),
            json!({"n": 42}),
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"s": "42"}));
    }
}
