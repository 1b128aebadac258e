//! Outbound credential acquisition over HTTP: OAuth2 grants and
//! cookie/session logins.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::AuthError;

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire shape of an OAuth2 token response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

fn classify(err: reqwest::Error) -> AuthError {
    if err.is_timeout() {
        AuthError::Upstream(format!("token endpoint timed out: {err}"))
    } else {
        AuthError::Upstream(err.to_string())
    }
}

async fn post_token_form(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let response = http
        .post(token_url)
        .timeout(TOKEN_REQUEST_TIMEOUT)
        .form(form)
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Rejected(format!(
            "token endpoint returned {status}: {body}"
        )));
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| AuthError::Rejected(format!("malformed token response: {e}")))
}

/// OAuth2 `client_credentials` grant.
pub async fn client_credentials(
    http: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    scope: Option<&str>,
) -> Result<TokenResponse, AuthError> {
    debug!(token_url, "requesting client_credentials token");
    let mut form = vec![
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }
    post_token_form(http, token_url, &form).await
}

/// OAuth2 `refresh_token` grant. The response may rotate the refresh token.
pub async fn refresh_token_grant(
    http: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenResponse, AuthError> {
    debug!(token_url, "refreshing token");
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    post_token_form(http, token_url, &form).await
}

/// Introspect an opaque inbound token (RFC 7662). Returns the claims when
/// the provider reports the token active.
pub async fn introspect(
    http: &reqwest::Client,
    introspection_url: &str,
    client_id: &str,
    client_secret: &str,
    token: &str,
) -> Result<Value, AuthError> {
    let response = http
        .post(introspection_url)
        .timeout(TOKEN_REQUEST_TIMEOUT)
        .basic_auth(client_id, Some(client_secret))
        .form(&[("token", token)])
        .send()
        .await
        .map_err(classify)?;
    if !response.status().is_success() {
        return Err(AuthError::Rejected(format!(
            "introspection returned {}",
            response.status()
        )));
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| AuthError::Rejected(format!("malformed introspection response: {e}")))?;
    if body.get("active").and_then(Value::as_bool) != Some(true) {
        return Err(AuthError::InvalidCredentials("token is not active".into()));
    }
    Ok(body)
}

/// Result of a cookie/session login.
pub struct SessionLogin {
    /// The `Set-Cookie` value, or the session id from the response body.
    pub session: String,
    pub ttl_secs: u64,
}

/// Perform a login request and capture the session credential.
///
/// The session comes from the first `Set-Cookie` header when present,
/// otherwise from a `session_id` / `sessionId` field of a JSON body.
pub async fn cookie_login(
    http: &reqwest::Client,
    login_url: &str,
    username: &str,
    password: &str,
    ttl_secs: u64,
) -> Result<SessionLogin, AuthError> {
    let response = http
        .post(login_url)
        .timeout(TOKEN_REQUEST_TIMEOUT)
        .json(&serde_json::json!({"username": username, "password": password}))
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Rejected(format!("login returned {status}")));
    }

    if let Some(cookie) = response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
    {
        // Keep only the name=value pair, dropping attributes.
        let session = cookie.split(';').next().unwrap_or(cookie).to_string();
        return Ok(SessionLogin {
            session,
            ttl_secs,
        });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| AuthError::Rejected(format!("login response unreadable: {e}")))?;
    let session = body
        .get("session_id")
        .or_else(|| body.get("sessionId"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AuthError::Rejected("login response carries neither cookie nor session id".into())
        })?;
    Ok(SessionLogin {
        session: session.to_string(),
        ttl_secs,
    })
}
