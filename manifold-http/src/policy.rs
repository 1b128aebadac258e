//! Inbound policy enforcement middleware.
//!
//! Reduces the request to the framework-neutral view the policy engine
//! consumes, enforces the first matching policy, and attaches the resulting
//! [`Principal`] to request extensions for handlers that want it.

use std::collections::HashMap;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::error;

use manifold_auth::{InboundDecision, Principal, RequestContext};

use crate::error::ApiError;
use crate::state::AppState;

/// Largest request body the middleware buffers for body-credential
/// extraction.
const BODY_LIMIT: usize = 512 * 1024;

fn parse_cookies(headers: &axum::http::HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    if let Some(raw) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                cookies.insert(name.to_string(), value.to_string());
            }
        }
    }
    cookies
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((name, value)) = pair.split_once('=') {
                params.insert(name.to_string(), value.to_string());
            }
        }
    }
    params
}

pub async fn enforce(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let headers: HashMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let cookies = parse_cookies(&parts.headers);
    let query = parse_query(parts.uri.query());

    // Buffer JSON bodies so body-located credentials stay extractable; the
    // request is rebuilt from the same bytes either way.
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::BadRequest("request body too large".into()).into_response();
        }
    };
    let body_json = if is_json && !bytes.is_empty() {
        serde_json::from_slice(&bytes).ok()
    } else {
        None
    };

    let context = RequestContext {
        path: parts.uri.path().to_string(),
        method: parts.method.as_str().to_string(),
        headers,
        cookies,
        query,
        body: body_json,
    };

    let decision = match state.policies.authorize(&context).await {
        Ok(decision) => decision,
        Err(err) => {
            error!(error = %err, "policy evaluation failed");
            return ApiError::Internal("policy evaluation failed".into()).into_response();
        }
    };

    let mut request = Request::from_parts(parts, Body::from(bytes));
    match decision {
        InboundDecision::Rejected(reason) => {
            ApiError::Unauthorized(reason).into_response()
        }
        InboundDecision::Authenticated(principal) => {
            request.extensions_mut().insert::<Principal>(principal);
            next.run(request).await
        }
        InboundDecision::Anonymous => next.run(request).await,
    }
}
