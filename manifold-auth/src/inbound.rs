//! Inbound request authentication per policy.
//!
//! The HTTP layer reduces each request to a [`RequestContext`]; the policy
//! engine resolves the first matching [`InboundAuthPolicy`] and enforces its
//! mode. Successful authentication yields a [`Principal`] the handler can
//! read from request extensions.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use manifold_core::model::adapter::{
    AdapterGrant, AuthAdapter, CredentialLocation, EnforcementMode,
};
use manifold_store::StorageGateway;
use manifold_vault::Vault;

use crate::error::AuthError;
use crate::{jwt, oauth};

/// Header that lets multi-tenant callers pick a specific adapter.
pub const ADAPTER_OVERRIDE_HEADER: &str = "x-auth-adapter-id";

/// Framework-neutral view of an inbound request.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub path: String,
    pub method: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Parsed JSON body, when there is one.
    pub body: Option<Value>,
}

/// Authenticated caller attached to the request.
#[derive(Clone, Debug)]
pub struct Principal {
    pub subject: String,
    pub adapter_id: Uuid,
    pub claims: Value,
}

/// Outcome of policy enforcement.
#[derive(Clone, Debug)]
pub enum InboundDecision {
    /// No matching policy, bypass mode, or optional mode without usable
    /// credentials.
    Anonymous,
    Authenticated(Principal),
    /// Required mode failed; the request must be rejected.
    Rejected(String),
}

/// Resolves policies and validates inbound credentials.
pub struct PolicyEngine {
    store: Arc<dyn StorageGateway>,
    vault: Arc<Vault>,
    http: reqwest::Client,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn StorageGateway>, vault: Arc<Vault>) -> Self {
        Self {
            store,
            vault,
            http: reqwest::Client::new(),
        }
    }

    /// Enforce the first matching policy against the request.
    pub async fn authorize(&self, request: &RequestContext) -> Result<InboundDecision, AuthError> {
        let policies = self.store.list_policies().await?;
        let Some(policy) = policies
            .iter()
            .filter(|p| p.enabled)
            .find(|p| p.matches(&request.path, &request.method))
        else {
            return Ok(InboundDecision::Anonymous);
        };

        if policy.mode == EnforcementMode::Bypass {
            return Ok(InboundDecision::Anonymous);
        }

        // Multi-tenant override: a caller may select among adapters.
        let adapter_id = request
            .headers
            .get(ADAPTER_OVERRIDE_HEADER)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or(policy.adapter_id);

        let adapter = match self.store.get_adapter(adapter_id).await? {
            Some(adapter) if adapter.enabled => adapter,
            _ => {
                warn!(%adapter_id, "policy references unknown or disabled adapter");
                return Ok(match policy.mode {
                    EnforcementMode::Required => {
                        InboundDecision::Rejected("authentication unavailable".into())
                    }
                    _ => InboundDecision::Anonymous,
                });
            }
        };

        match self.validate(request, &adapter).await {
            Ok(principal) => Ok(InboundDecision::Authenticated(principal)),
            Err(err) => {
                debug!(adapter = %adapter.name, error = %err, "inbound validation failed");
                Ok(match policy.mode {
                    EnforcementMode::Required => InboundDecision::Rejected(err.to_string()),
                    _ => InboundDecision::Anonymous,
                })
            }
        }
    }

    /// Extract the credential per the adapter's location and validate it.
    async fn validate(
        &self,
        request: &RequestContext,
        adapter: &AuthAdapter,
    ) -> Result<Principal, AuthError> {
        let raw = extract_credential(request, adapter)?;
        let secret = self.vault.read_secret(adapter.secret_id).await?;

        let claims = match adapter.grant {
            AdapterGrant::Jwt => {
                let settings = adapter.jwt.as_ref().ok_or_else(|| {
                    AuthError::AdapterConfig("jwt adapter without jwt settings".into())
                })?;
                jwt::validate(&raw, settings, &secret)?
            }
            AdapterGrant::Oauth2ClientCredentials | AdapterGrant::Oauth2RefreshToken => {
                let introspection_url = adapter.introspection_url.as_deref().ok_or_else(|| {
                    AuthError::AdapterConfig("oauth2 adapter without introspection_url".into())
                })?;
                let (client_id, client_secret) = (
                    secret
                        .get("client_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    secret
                        .get("client_secret")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                );
                oauth::introspect(&self.http, introspection_url, client_id, client_secret, &raw)
                    .await?
            }
            AdapterGrant::ApiKey => {
                let expected = secret
                    .get("api_key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AuthError::AdapterConfig("secret missing 'api_key'".into()))?;
                if raw != expected {
                    return Err(AuthError::InvalidCredentials("api key mismatch".into()));
                }
                serde_json::json!({"sub": adapter.name})
            }
            AdapterGrant::CookieSession => {
                // Valid when it matches the session this adapter last
                // established.
                let entry = self
                    .store
                    .get_token(&manifold_core::model::token::TokenCacheKey {
                        adapter_id: adapter.id,
                        token_type: manifold_core::model::token::TokenType::Session,
                        scope: adapter.scope.clone().unwrap_or_default(),
                    })
                    .await?;
                let sealed = entry.and_then(|e| e.access_token).ok_or_else(|| {
                    AuthError::InvalidCredentials("no active session".into())
                })?;
                let session = self.vault.open_string(&sealed).await?;
                if raw != session {
                    return Err(AuthError::InvalidCredentials("session mismatch".into()));
                }
                serde_json::json!({"sub": adapter.name})
            }
        };

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or(&adapter.name)
            .to_string();
        Ok(Principal {
            subject,
            adapter_id: adapter.id,
            claims,
        })
    }
}

/// Pull the raw credential out of the request per the adapter's location.
fn extract_credential(
    request: &RequestContext,
    adapter: &AuthAdapter,
) -> Result<String, AuthError> {
    let raw = match &adapter.location {
        CredentialLocation::Header(name) => request.headers.get(&name.to_ascii_lowercase()),
        CredentialLocation::Cookie(name) => request.cookies.get(name),
        CredentialLocation::Query(name) => request.query.get(name),
        CredentialLocation::Body(field) => {
            return request
                .body
                .as_ref()
                .and_then(|b| b.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    AuthError::MissingCredentials(format!("body field '{field}' absent"))
                });
        }
    }
    .ok_or_else(|| AuthError::MissingCredentials("credential location empty".into()))?;

    // Strip the configured prefix (e.g. "Bearer ") when present.
    let value = match &adapter.prefix {
        Some(prefix) => raw
            .strip_prefix(prefix.as_str())
            .unwrap_or(raw.as_str())
            .to_string(),
        None => raw.clone(),
    };
    if value.is_empty() {
        return Err(AuthError::MissingCredentials("credential is empty".into()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::model::adapter::JwtSettings;

    fn header_adapter(prefix: Option<&str>) -> AuthAdapter {
        AuthAdapter {
            id: Uuid::new_v4(),
            name: "partner".into(),
            grant: AdapterGrant::Jwt,
            secret_id: Uuid::new_v4(),
            location: CredentialLocation::Header("Authorization".into()),
            prefix: prefix.map(str::to_string),
            token_url: None,
            scope: None,
            jwt: Some(JwtSettings {
                algorithm: "HS256".into(),
                issuer: "iss".into(),
                audience: "aud".into(),
                expires_in_secs: 60,
            }),
            introspection_url: None,
            enabled: true,
        }
    }

    fn request_with_header(name: &str, value: &str) -> RequestContext {
        let mut headers = HashMap::new();
        headers.insert(name.to_ascii_lowercase(), value.to_string());
        RequestContext {
            path: "/api/webhook/orders".into(),
            method: "POST".into(),
            headers,
            ..RequestContext::default()
        }
    }

    #[test]
    fn extracts_bearer_token_from_header() {
        let adapter = header_adapter(Some("Bearer "));
        let req = request_with_header("Authorization", "Bearer tok-123");
        assert_eq!(extract_credential(&req, &adapter).unwrap(), "tok-123");
    }

    #[test]
    fn missing_header_is_missing_credentials() {
        let adapter = header_adapter(None);
        let req = RequestContext::default();
        assert!(matches!(
            extract_credential(&req, &adapter),
            Err(AuthError::MissingCredentials(_))
        ));
    }

    #[test]
    fn extracts_from_body_field() {
        let mut adapter = header_adapter(None);
        adapter.location = CredentialLocation::Body("token".into());
        let req = RequestContext {
            body: Some(serde_json::json!({"token": "t-1"})),
            ..RequestContext::default()
        };
        assert_eq!(extract_credential(&req, &adapter).unwrap(), "t-1");
    }

    #[test]
    fn extracts_from_query_param() {
        let mut adapter = header_adapter(None);
        adapter.location = CredentialLocation::Query("key".into());
        let mut query = HashMap::new();
        query.insert("key".to_string(), "q-1".to_string());
        let req = RequestContext {
            query,
            ..RequestContext::default()
        };
        assert_eq!(extract_credential(&req, &adapter).unwrap(), "q-1");
    }
}
