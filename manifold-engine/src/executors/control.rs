//! Conditional routing: evaluate a declarative predicate against the input
//! and route the payload down the `Success` or `Failure` branch.
//!
//! Predicate config:
//!
//! ```json
//! {
//!   "condition": {"path": "score", "op": "gt", "value": 60},
//!   "on_true":  {"decision": "HOLD"},
//!   "on_false": {"decision": "FULFILL"}
//! }
//! ```
//!
//! `op` is one of eq, neq, gt, gte, lt, lte, contains, exists. With no `op`
//! the value at `path` is coerced to a boolean (truthiness rules in
//! `manifold_core::record`). The optional `on_true`/`on_false` objects are
//! merged into the payload of the taken branch.

use async_trait::async_trait;
use serde_json::Value;

use manifold_core::model::flow::Node;
use manifold_core::record::{get_path, is_truthy, merge};
use manifold_core::EngineError;

use crate::orchestrator::{FAILURE_LABEL, SUCCESS_LABEL};
use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

pub struct ConditionalExecutor;

fn compare_numbers(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    let l = left.as_f64()?;
    let r = right.as_f64()?;
    l.partial_cmp(&r)
}

/// Evaluate the predicate; a non-boolean result is coerced by truthiness.
fn evaluate(condition: &Value, payload: &Value) -> Result<bool, EngineError> {
    let path = condition
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::validation("conditional missing 'condition.path'"))?;
    let actual = get_path(payload, path);

    let Some(op) = condition.get("op").and_then(Value::as_str) else {
        return Ok(actual.map(is_truthy).unwrap_or(false));
    };
    let expected = condition.get("value").unwrap_or(&Value::Null);

    let result = match op {
        "exists" => actual.is_some(),
        "eq" => actual.map(|a| a == expected).unwrap_or(false),
        "neq" => actual.map(|a| a != expected).unwrap_or(true),
        "gt" | "gte" | "lt" | "lte" => {
            let Some(actual) = actual else {
                return Ok(false);
            };
            match compare_numbers(actual, expected) {
                Some(ordering) => match op {
                    "gt" => ordering == std::cmp::Ordering::Greater,
                    "gte" => ordering != std::cmp::Ordering::Less,
                    "lt" => ordering == std::cmp::Ordering::Less,
                    _ => ordering != std::cmp::Ordering::Greater,
                },
                None => {
                    return Err(EngineError::validation(format!(
                        "'{op}' needs numeric operands at '{path}'"
                    )))
                }
            }
        }
        "contains" => match (actual, expected.as_str()) {
            (Some(Value::String(haystack)), Some(needle)) => haystack.contains(needle),
            (Some(Value::Array(items)), _) => items.contains(expected),
            _ => false,
        },
        other => {
            return Err(EngineError::validation(format!(
                "unknown conditional op '{other}'"
            )))
        }
    };
    Ok(result)
}

#[async_trait]
impl NodeExecutor for ConditionalExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let condition = node
            .config
            .get("condition")
            .ok_or_else(|| EngineError::validation("conditional missing 'condition'"))?;
        let taken = evaluate(condition, &input.payload)?;

        let mut payload = input.payload;
        let annotation = if taken {
            node.config.get("on_true")
        } else {
            node.config.get("on_false")
        };
        if let Some(extra) = annotation {
            merge(&mut payload, extra.clone());
        }

        Ok(NodeOutcome::Routed {
            payload,
            label: if taken {
                SUCCESS_LABEL.to_string()
            } else {
                FAILURE_LABEL.to_string()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_comparisons() {
        let cond = json!({"path": "score", "op": "gt", "value": 60});
        assert!(evaluate(&cond, &json!({"score": 75})).unwrap());
        assert!(!evaluate(&cond, &json!({"score": 10})).unwrap());
        assert!(!evaluate(&cond, &json!({"other": 1})).unwrap());
    }

    #[test]
    fn equality_on_strings() {
        let cond = json!({"path": "status", "op": "eq", "value": "open"});
        assert!(evaluate(&cond, &json!({"status": "open"})).unwrap());
        assert!(!evaluate(&cond, &json!({"status": "closed"})).unwrap());
    }

    #[test]
    fn exists_and_contains() {
        assert!(evaluate(
            &json!({"path": "a.b", "op": "exists"}),
            &json!({"a": {"b": 0}})
        )
        .unwrap());
        assert!(evaluate(
            &json!({"path": "tags", "op": "contains", "value": "vip"}),
            &json!({"tags": ["vip", "eu"]})
        )
        .unwrap());
        assert!(evaluate(
            &json!({"path": "note", "op": "contains", "value": "urgent"}),
            &json!({"note": "very urgent order"})
        )
        .unwrap());
    }

    #[test]
    fn no_op_coerces_truthiness() {
        let cond = json!({"path": "flag"});
        assert!(evaluate(&cond, &json!({"flag": "yes"})).unwrap());
        assert!(!evaluate(&cond, &json!({"flag": ""})).unwrap());
        assert!(!evaluate(&cond, &json!({"flag": 0})).unwrap());
        assert!(!evaluate(&cond, &json!({})).unwrap());
    }

    #[test]
    fn non_numeric_comparison_is_validation_error() {
        let cond = json!({"path": "score", "op": "gt", "value": 60});
        let err = evaluate(&cond, &json!({"score": "high"})).unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Validation);
    }
}
