//! Parser executors: JSON, CSV, and XML payloads into structured records.
//!
//! All three read their raw text from `source_path` in the input (default:
//! the whole payload when it is a string, else the conventional `raw`
//! field) and fail with kind `transformation` on malformed input.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{json, Map, Value};

use manifold_core::model::flow::Node;
use manifold_core::record::{get_path, set_path};
use manifold_core::EngineError;

use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

/// Resolve the raw text a parser consumes.
fn source_text<'a>(node: &Node, payload: &'a Value) -> Result<&'a str, EngineError> {
    if let Some(path) = node.config.get("source_path").and_then(Value::as_str) {
        return get_path(payload, path)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::transformation(format!("no text at source_path '{path}'"))
            });
    }
    if let Some(text) = payload.as_str() {
        return Ok(text);
    }
    payload
        .get("raw")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::transformation("no raw text to parse"))
}

/// Attach the parsed value: replace the payload, or set `target_path`.
fn attach(node: &Node, payload: Value, parsed: Value) -> Value {
    match node.config.get("target_path").and_then(Value::as_str) {
        Some(path) => {
            let mut out = payload;
            set_path(&mut out, path, parsed);
            out
        }
        None => parsed,
    }
}

pub struct JsonParserExecutor;

#[async_trait]
impl NodeExecutor for JsonParserExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let text = source_text(node, &input.payload)?;
        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| EngineError::transformation(format!("invalid JSON: {e}")))?;
        Ok(NodeOutcome::Advance(attach(node, input.payload, parsed)))
    }
}

pub struct CsvParserExecutor;

fn single_char(node: &Node, key: &str, default: u8) -> Result<u8, EngineError> {
    match node.config.get(key).and_then(Value::as_str) {
        None => Ok(default),
        Some(s) if s.len() == 1 => Ok(s.as_bytes()[0]),
        Some(s) => Err(EngineError::validation(format!(
            "csv '{key}' must be one character, got '{s}'"
        ))),
    }
}

#[async_trait]
impl NodeExecutor for CsvParserExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let text = source_text(node, &input.payload)?;
        let delimiter = single_char(node, "delimiter", b',')?;
        let quote = single_char(node, "quote", b'"')?;
        let has_headers = node
            .config
            .get("has_headers")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let trim = node
            .config
            .get("trim")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let custom_columns: Option<Vec<String>> = node
            .config
            .get("columns")
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .quote(quote)
            .has_headers(has_headers)
            .trim(if trim { csv::Trim::All } else { csv::Trim::None })
            .flexible(true)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = match (&custom_columns, has_headers) {
            (Some(cols), _) => cols.clone(),
            (None, true) => reader
                .headers()
                .map_err(|e| EngineError::transformation(format!("csv headers: {e}")))?
                .iter()
                .map(str::to_string)
                .collect(),
            (None, false) => Vec::new(),
        };

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| EngineError::transformation(format!("csv row: {e}")))?;
            let mut row = Map::new();
            for (i, field) in record.iter().enumerate() {
                let key = columns
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("column_{i}"));
                row.insert(key, Value::String(field.to_string()));
            }
            rows.push(Value::Object(row));
        }

        let count = rows.len();
        let parsed = json!({"rows": rows, "count": count});
        Ok(NodeOutcome::Advance(attach(node, input.payload, parsed)))
    }
}

pub struct XmlParserExecutor;

/// Convert an XML document into a JSON object: elements become keys,
/// repeated elements arrays, attributes `@`-prefixed keys, text `#text`.
fn xml_to_json(text: &str) -> Result<Value, EngineError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<(String, Map<String, Value>)> = vec![(String::new(), Map::new())];
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let mut element = Map::new();
                for attr in start.attributes().flatten() {
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    element.insert(
                        key,
                        Value::String(String::from_utf8_lossy(&attr.value).to_string()),
                    );
                }
                stack.push((name, element));
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let mut element = Map::new();
                for attr in start.attributes().flatten() {
                    let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
                    element.insert(
                        key,
                        Value::String(String::from_utf8_lossy(&attr.value).to_string()),
                    );
                }
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| EngineError::transformation("xml structure underflow"))?;
                insert_child(&mut parent.1, name, Value::Object(element));
            }
            Ok(Event::Text(text)) => {
                let content = text
                    .unescape()
                    .map_err(|e| EngineError::transformation(format!("xml text: {e}")))?
                    .to_string();
                if !content.is_empty() {
                    if let Some((_, element)) = stack.last_mut() {
                        element.insert("#text".to_string(), Value::String(content));
                    }
                }
            }
            Ok(Event::End(_)) => {
                let (name, element) = stack
                    .pop()
                    .ok_or_else(|| EngineError::transformation("xml structure underflow"))?;
                // An element holding only text collapses to a string.
                let value = if element.len() == 1 && element.contains_key("#text") {
                    element["#text"].clone()
                } else {
                    Value::Object(element)
                };
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| EngineError::transformation("xml structure underflow"))?;
                insert_child(&mut parent.1, name, value);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(EngineError::transformation(format!("invalid XML: {e}")));
            }
        }
    }
    let (_, root) = stack
        .pop()
        .ok_or_else(|| EngineError::transformation("xml structure underflow"))?;
    Ok(Value::Object(root))
}

/// Insert a child value, promoting repeated names into arrays.
fn insert_child(parent: &mut Map<String, Value>, name: String, value: Value) {
    match parent.get_mut(&name) {
        None => {
            parent.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            parent.insert(name, Value::Array(vec![first, value]));
        }
    }
}

#[async_trait]
impl NodeExecutor for XmlParserExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let text = source_text(node, &input.payload)?;
        let parsed = xml_to_json(text)?;
        Ok(NodeOutcome::Advance(attach(node, input.payload, parsed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_with(config: Value) -> Node {
        Node {
            id: "parse".into(),
            kind: manifold_core::model::flow::NodeKind::JsonParser,
            name: None,
            config,
            adapter_id: None,
            retry: None,
        }
    }

    fn scope_stub() -> ExecutionScope {
        crate::test_support::scope()
    }

    #[tokio::test]
    async fn json_parser_parses_string_payload() {
        let exec = JsonParserExecutor;
        let outcome = exec
            .execute(
                &node_with(json!({})),
                NodeInput::seed(json!("{\"a\": 1}")),
                &scope_stub(),
            )
            .await
            .unwrap();
        match outcome {
            NodeOutcome::Advance(v) => assert_eq!(v, json!({"a": 1})),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn json_parser_reads_source_path_and_sets_target() {
        let exec = JsonParserExecutor;
        let node = node_with(json!({"source_path": "file.content", "target_path": "parsed"}));
        let input = json!({"file": {"content": "{\"order\": 7}"}});
        let outcome = exec
            .execute(&node, NodeInput::seed(input), &scope_stub())
            .await
            .unwrap();
        match outcome {
            NodeOutcome::Advance(v) => {
                assert_eq!(v["parsed"]["order"], 7);
                assert_eq!(v["file"]["content"], "{\"order\": 7}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn json_parser_rejects_malformed_input() {
        let exec = JsonParserExecutor;
        let err = exec
            .execute(
                &node_with(json!({})),
                NodeInput::seed(json!("{nope")),
                &scope_stub(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Transformation);
    }

    #[tokio::test]
    async fn csv_parser_with_headers() {
        let exec = CsvParserExecutor;
        let outcome = exec
            .execute(
                &node_with(json!({})),
                NodeInput::seed(json!("id,name\n1,Ada\n2,Grace")),
                &scope_stub(),
            )
            .await
            .unwrap();
        match outcome {
            NodeOutcome::Advance(v) => {
                assert_eq!(v["count"], 2);
                assert_eq!(v["rows"][0]["id"], "1");
                assert_eq!(v["rows"][1]["name"], "Grace");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn csv_parser_custom_columns_semicolon() {
        let exec = CsvParserExecutor;
        let node = node_with(json!({
            "delimiter": ";",
            "has_headers": false,
            "trim": true,
            "columns": ["sku", "qty"],
        }));
        let outcome = exec
            .execute(
                &node,
                NodeInput::seed(json!("A-1; 3\nB-2; 5")),
                &scope_stub(),
            )
            .await
            .unwrap();
        match outcome {
            NodeOutcome::Advance(v) => {
                assert_eq!(v["rows"][0]["sku"], "A-1");
                assert_eq!(v["rows"][0]["qty"], "3");
                assert_eq!(v["rows"][1]["qty"], "5");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn xml_parser_builds_nested_objects() {
        let exec = XmlParserExecutor;
        let xml = "<order id=\"A\"><item><sku>X</sku><qty>2</qty></item><item><sku>Y</sku><qty>1</qty></item></order>";
        let outcome = exec
            .execute(
                &node_with(json!({})),
                NodeInput::seed(json!(xml)),
                &scope_stub(),
            )
            .await
            .unwrap();
        match outcome {
            NodeOutcome::Advance(v) => {
                assert_eq!(v["order"]["@id"], "A");
                assert_eq!(v["order"]["item"][0]["sku"], "X");
                assert_eq!(v["order"]["item"][1]["qty"], "1");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn xml_parser_rejects_malformed_input() {
        let exec = XmlParserExecutor;
        let err = exec
            .execute(
                &node_with(json!({})),
                NodeInput::seed(json!("<a><b></a>")),
                &scope_stub(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Transformation);
    }
}
