//! Connector executors: HTTP source/destination, database writes, SFTP and
//! blob file transfer, and queue production.
//!
//! In emulation mode every connector returns a deterministic mock without
//! touching the network or consulting credentials.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use manifold_core::model::adapter::CredentialLocation;
use manifold_core::model::flow::Node;
use manifold_core::record::get_path;
use manifold_core::{EngineError, ErrorKind};

use crate::poller::{remote_dir_for, sha256_hex};
use crate::registry::{NodeExecutor, NodeOutcome};
use crate::scope::{ExecutionScope, NodeInput};

fn config_str<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.config.get(key).and_then(Value::as_str)
}

fn required_str<'a>(node: &'a Node, key: &str) -> Result<&'a str, EngineError> {
    config_str(node, key)
        .ok_or_else(|| EngineError::validation(format!("connector missing '{key}'")))
}

/// Place the adapter credential on an outbound request.
async fn with_credentials(
    request: reqwest::RequestBuilder,
    node: &Node,
    scope: &ExecutionScope,
) -> Result<reqwest::RequestBuilder, EngineError> {
    let Some(adapter_id) = node.adapter_id else {
        return Ok(request);
    };
    let adapter = scope
        .services
        .store
        .get_adapter(adapter_id)
        .await?
        .ok_or_else(|| EngineError::auth(format!("adapter {adapter_id} not found")))?;
    let credential = scope
        .services
        .tokens
        .access_credential(&adapter)
        .await
        .map_err(EngineError::from)?;

    Ok(match &adapter.location {
        CredentialLocation::Header(name) => {
            let value = match &adapter.prefix {
                Some(prefix) => format!("{prefix}{credential}"),
                None => credential,
            };
            request.header(name.as_str(), value)
        }
        CredentialLocation::Cookie(name) => {
            // Session logins store the full name=value pair already.
            let cookie = if credential.contains('=') {
                credential
            } else {
                format!("{name}={credential}")
            };
            request.header(reqwest::header::COOKIE, cookie)
        }
        CredentialLocation::Query(name) => request.query(&[(name.as_str(), credential.as_str())]),
        CredentialLocation::Body(_) => {
            // Body placement only makes sense for form-style destinations;
            // header transport is the fallback.
            request.header(reqwest::header::AUTHORIZATION, credential)
        }
    })
}

/// Convert an HTTP response into a node output, mapping failures onto the
/// error taxonomy and honoring Retry-After on 429.
async fn response_to_output(response: reqwest::Response) -> Result<Value, EngineError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let kind = ErrorKind::from_http_status(status.as_u16());
        let message = format!("upstream returned {status}: {body}");
        return Err(match kind {
            ErrorKind::RateLimit => EngineError::rate_limit(message, retry_after),
            kind => EngineError::new(kind, message),
        });
    }
    let status_code = status.as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| EngineError::connection(e.to_string()))?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    Ok(json!({"status": status_code, "body": body}))
}

fn classify_reqwest(err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::timeout(err.to_string())
    } else {
        EngineError::connection(err.to_string())
    }
}

/// HTTP source: GET with optional query parameters.
pub struct HttpRequestExecutor;

#[async_trait]
impl NodeExecutor for HttpRequestExecutor {
    async fn execute(
        &self,
        node: &Node,
        _input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let url = required_str(node, "url")?;
        if scope.emulation {
            return Ok(NodeOutcome::Advance(json!({
                "status": 200,
                "body": {"emulated": true, "url": url},
            })));
        }

        let mut request = scope
            .services
            .http
            .get(url)
            .timeout(scope.node_timeout)
            .header("X-Trace-Id", scope.trace_id.clone());
        if let Some(headers) = node.config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        if let Some(query) = node.config.get("query").and_then(Value::as_object) {
            for (name, value) in query {
                if let Some(value) = value.as_str() {
                    request = request.query(&[(name.as_str(), value)]);
                }
            }
        }
        request = with_credentials(request, node, scope).await?;

        debug!(url, "http request");
        let response = request.send().await.map_err(classify_reqwest)?;
        Ok(NodeOutcome::Advance(response_to_output(response).await?))
    }
}

/// HTTP destination: POST/PUT/PATCH/DELETE with JSON or form body.
pub struct HttpDestinationExecutor;

#[async_trait]
impl NodeExecutor for HttpDestinationExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let url = required_str(node, "url")?;
        let method = config_str(node, "method").unwrap_or("POST").to_uppercase();
        if scope.emulation {
            return Ok(NodeOutcome::Advance(json!({
                "status": 200,
                "body": {"emulated": true, "url": url, "method": method},
            })));
        }

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| EngineError::validation(format!("bad HTTP method '{method}'")))?;
        if !matches!(
            method,
            reqwest::Method::POST
                | reqwest::Method::PUT
                | reqwest::Method::PATCH
                | reqwest::Method::DELETE
        ) {
            return Err(EngineError::validation(format!(
                "http destination does not send {method}"
            )));
        }

        let body = match config_str(node, "body_path") {
            Some(path) => get_path(&input.payload, path).cloned().ok_or_else(|| {
                EngineError::transformation(format!("no body at '{path}'"))
            })?,
            None => input.payload.clone(),
        };

        let mut request = scope
            .services
            .http
            .request(method, url)
            .timeout(scope.node_timeout)
            .header("X-Trace-Id", scope.trace_id.clone());
        if let Some(headers) = node.config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        request = match config_str(node, "encoding") {
            Some("form") => {
                let form: Vec<(String, String)> = body
                    .as_object()
                    .map(|map| {
                        map.iter()
                            .map(|(k, v)| {
                                let value = match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                (k.clone(), value)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                request.form(&form)
            }
            _ => request.json(&body),
        };
        request = with_credentials(request, node, scope).await?;

        debug!(url, "http destination");
        let response = request.send().await.map_err(classify_reqwest)?;
        Ok(NodeOutcome::Advance(response_to_output(response).await?))
    }
}

/// Database connector: executes a write statement against the configured
/// database with parameters bound from payload paths.
pub struct DbConnectorExecutor;

#[async_trait]
impl NodeExecutor for DbConnectorExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let statement = required_str(node, "statement")?;
        if scope.emulation {
            return Ok(NodeOutcome::Advance(json!({
                "emulated": true,
                "rows_affected": 1,
            })));
        }

        let adapter_id = node
            .adapter_id
            .ok_or_else(|| EngineError::validation("db connector needs an adapter"))?;
        let adapter = scope
            .services
            .store
            .get_adapter(adapter_id)
            .await?
            .ok_or_else(|| EngineError::auth(format!("adapter {adapter_id} not found")))?;
        let secret = scope
            .services
            .vault
            .read_secret(adapter.secret_id)
            .await
            .map_err(EngineError::from)?;
        let connection_string = secret
            .get("connection_string")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::auth("secret missing 'connection_string'"))?;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(connection_string)
            .await
            .map_err(|e| EngineError::connection(format!("db connect: {e}")))?;

        let mut query = sqlx::query(statement);
        if let Some(params) = node.config.get("params").and_then(Value::as_array) {
            for param in params {
                let path = param.as_str().ok_or_else(|| {
                    EngineError::validation("db params must be payload paths")
                })?;
                let value = get_path(&input.payload, path).cloned().unwrap_or(Value::Null);
                query = match value {
                    Value::String(s) => query.bind(s),
                    Value::Bool(b) => query.bind(b),
                    Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
                    Value::Number(n) => query.bind(n.as_f64()),
                    Value::Null => query.bind(Option::<String>::None),
                    other => query.bind(other),
                };
            }
        }
        let result = query
            .execute(&pool)
            .await
            .map_err(|e| EngineError::connection(format!("db execute: {e}")))?;
        pool.close().await;

        Ok(NodeOutcome::Advance(json!({
            "rows_affected": result.rows_affected(),
        })))
    }
}

/// SFTP/blob connector: download a remote file into the payload or upload
/// payload content to the remote side.
pub struct FileConnectorExecutor;

#[async_trait]
impl NodeExecutor for FileConnectorExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let operation = config_str(node, "operation").unwrap_or("upload");
        if scope.emulation {
            return Ok(NodeOutcome::Advance(json!({
                "emulated": true,
                "operation": operation,
            })));
        }
        let dir = remote_dir_for(node, &scope.services.http)?;

        match operation {
            "download" => {
                let name = required_str(node, "file_name")?;
                let content = dir.fetch(name).await?;
                Ok(NodeOutcome::Advance(json!({
                    "file": {
                        "name": name,
                        "content": String::from_utf8_lossy(&content),
                        "size": content.len(),
                        "checksum": sha256_hex(&content),
                    },
                })))
            }
            "upload" => {
                let name = match config_str(node, "target_name") {
                    Some(name) => name.to_string(),
                    None => get_path(&input.payload, "file.name")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            EngineError::validation("upload needs 'target_name' or file.name")
                        })?,
                };
                let content_path = config_str(node, "content_path").unwrap_or("file.content");
                let content = get_path(&input.payload, content_path)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EngineError::transformation(format!("no content at '{content_path}'"))
                    })?;
                dir.put(&name, content.as_bytes()).await?;
                let mut output = input.payload.clone();
                manifold_core::record::set_path(&mut output, "uploaded", json!(name));
                Ok(NodeOutcome::Advance(output))
            }
            other => Err(EngineError::validation(format!(
                "unknown file operation '{other}'"
            ))),
        }
    }
}

/// Message-queue producer: publish the payload onto a configured topic.
pub struct QueueProducerExecutor;

#[async_trait]
impl NodeExecutor for QueueProducerExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        scope: &ExecutionScope,
    ) -> Result<NodeOutcome, EngineError> {
        let topic = required_str(node, "topic")?;
        if scope.emulation {
            return Ok(NodeOutcome::Advance(input.payload));
        }
        scope
            .services
            .queue
            .enqueue(topic, input.payload.clone())
            .await
            .map_err(|e| EngineError::connection(e.to_string()))?;
        debug!(topic, "payload published");
        Ok(NodeOutcome::Advance(input.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::model::flow::NodeKind;

    fn node(kind: NodeKind, config: Value) -> Node {
        Node {
            id: "c".into(),
            kind,
            name: None,
            config,
            adapter_id: None,
            retry: None,
        }
    }

    #[tokio::test]
    async fn emulated_http_request_is_deterministic() {
        let scope = crate::test_support::emulation_scope();
        let n = node(NodeKind::HttpRequest, json!({"url": "https://api.example"}));
        let first = HttpRequestExecutor
            .execute(&n, NodeInput::seed(json!({})), &scope)
            .await
            .unwrap();
        let second = HttpRequestExecutor
            .execute(&n, NodeInput::seed(json!({})), &scope)
            .await
            .unwrap();
        assert_eq!(
            format!("{first:?}"),
            format!("{second:?}"),
            "emulation must be deterministic"
        );
    }

    #[tokio::test]
    async fn destination_rejects_get() {
        let scope = crate::test_support::scope();
        let n = node(
            NodeKind::HttpDestination,
            json!({"url": "https://api.example", "method": "GET"}),
        );
        let err = HttpDestinationExecutor
            .execute(&n, NodeInput::seed(json!({})), &scope)
            .await
            .unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn missing_url_is_validation_error() {
        let scope = crate::test_support::scope();
        let n = node(NodeKind::HttpRequest, json!({}));
        let err = HttpRequestExecutor
            .execute(&n, NodeInput::seed(json!({})), &scope)
            .await
            .unwrap_err();
        assert_eq!(err.kind, manifold_core::ErrorKind::Validation);
    }
}
