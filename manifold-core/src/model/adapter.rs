use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a credential is read from on inbound requests, or placed on
/// outbound ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "in", content = "name")]
pub enum CredentialLocation {
    /// Header name; for `Authorization` a prefix like `Bearer ` is split off.
    Header(String),
    Cookie(String),
    Query(String),
    /// Top-level field of a JSON body.
    Body(String),
}

/// How an adapter acquires or validates a credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterGrant {
    /// POST to `token_url` with client credentials.
    Oauth2ClientCredentials,
    /// POST to `token_url` with a stored refresh token; rotates on response.
    Oauth2RefreshToken,
    /// Mint locally with the configured algorithm and claims.
    Jwt,
    /// Perform a login request and reuse the returned cookie or session id.
    CookieSession,
    /// Static API key from the vault.
    ApiKey,
}

/// JWT signing configuration for adapters with [`AdapterGrant::Jwt`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwtSettings {
    /// HS256, HS512, RS256 or RS512.
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    /// Token lifetime in seconds.
    pub expires_in_secs: u64,
}

/// A declarative description of how to obtain or validate a credential.
///
/// Adapters are referenced by nodes (outbound placement) and by inbound
/// policies (extraction + validation). The sensitive material itself lives in
/// the vault under `secret_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthAdapter {
    pub id: Uuid,
    pub name: String,
    pub grant: AdapterGrant,
    /// Vault secret holding client credentials / signing keys / login data.
    pub secret_id: Uuid,
    /// Outbound placement; also the inbound extraction point for policies.
    pub location: CredentialLocation,
    /// Prefix prepended on outbound placement, e.g. `Bearer `.
    #[serde(default)]
    pub prefix: Option<String>,
    /// OAuth2 token endpoint, when the grant needs one.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub jwt: Option<JwtSettings>,
    /// OAuth2 introspection endpoint for inbound validation.
    #[serde(default)]
    pub introspection_url: Option<String>,
    pub enabled: bool,
}

/// What a policy does when credentials are missing or invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Proceed without authentication.
    Bypass,
    /// Validate when present; proceed unauthenticated on failure.
    Optional,
    /// Reject the request on failure.
    Required,
}

/// Binds a route pattern + method to an adapter with an enforcement mode.
///
/// Patterns match path segments literally, with `*` matching exactly one
/// segment and a trailing `**` matching the rest. Method `"*"` matches all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundAuthPolicy {
    pub id: Uuid,
    pub route_pattern: String,
    pub method: String,
    pub adapter_id: Uuid,
    pub mode: EnforcementMode,
    /// Lower values are consulted first.
    pub priority: i32,
    pub enabled: bool,
}

impl InboundAuthPolicy {
    /// Whether this policy applies to the given path and method.
    pub fn matches(&self, path: &str, method: &str) -> bool {
        if self.method != "*" && !self.method.eq_ignore_ascii_case(method) {
            return false;
        }
        let pattern: Vec<&str> = self.route_pattern.trim_matches('/').split('/').collect();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        for (i, p) in pattern.iter().enumerate() {
            if *p == "**" {
                return true;
            }
            match segments.get(i) {
                Some(s) if *p == "*" || p == s => continue,
                _ => return false,
            }
        }
        pattern.len() == segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(pattern: &str, method: &str) -> InboundAuthPolicy {
        InboundAuthPolicy {
            id: Uuid::new_v4(),
            route_pattern: pattern.into(),
            method: method.into(),
            adapter_id: Uuid::new_v4(),
            mode: EnforcementMode::Required,
            priority: 0,
            enabled: true,
        }
    }

    #[test]
    fn literal_and_wildcard_segments() {
        let p = policy("/api/webhook/*", "POST");
        assert!(p.matches("/api/webhook/orders", "POST"));
        assert!(p.matches("/api/webhook/orders", "post"));
        assert!(!p.matches("/api/webhook/orders/extra", "POST"));
        assert!(!p.matches("/api/webhook", "POST"));
        assert!(!p.matches("/api/webhook/orders", "GET"));
    }

    #[test]
    fn trailing_double_star_matches_rest() {
        let p = policy("/api/**", "*");
        assert!(p.matches("/api/flows/123/execute", "POST"));
        assert!(p.matches("/api", "GET") == false);
    }

    #[test]
    fn exact_match_requires_equal_length() {
        let p = policy("/healthz", "GET");
        assert!(p.matches("/healthz", "GET"));
        assert!(!p.matches("/healthz/deep", "GET"));
    }
}
