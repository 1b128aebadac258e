//! Local JWT mint and validation.
//!
//! Symmetric algorithms (HS256/HS512) sign with the vault secret's `secret`
//! field; asymmetric ones (RS256/RS512) expect a PEM private key in the same
//! field and a `public_key` PEM for inbound validation.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Value};

use manifold_core::model::adapter::JwtSettings;

use crate::error::AuthError;

pub fn algorithm_from_str(name: &str) -> Result<Algorithm, AuthError> {
    match name.to_ascii_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS512" => Ok(Algorithm::RS512),
        other => Err(AuthError::AdapterConfig(format!(
            "unsupported JWT algorithm '{other}'"
        ))),
    }
}

fn now_secs() -> Result<u64, AuthError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AuthError::AdapterConfig(format!("system clock error: {e}")))
}

fn encoding_key(algorithm: Algorithm, secret: &Value) -> Result<EncodingKey, AuthError> {
    let material = secret
        .get("secret")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::AdapterConfig("jwt secret payload missing 'secret'".into()))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS512 => Ok(EncodingKey::from_secret(material.as_bytes())),
        Algorithm::RS256 | Algorithm::RS512 => EncodingKey::from_rsa_pem(material.as_bytes())
            .map_err(|e| AuthError::AdapterConfig(format!("bad RSA private key: {e}"))),
        _ => Err(AuthError::AdapterConfig("unsupported algorithm".into())),
    }
}

fn decoding_key(algorithm: Algorithm, secret: &Value) -> Result<DecodingKey, AuthError> {
    match algorithm {
        Algorithm::HS256 | Algorithm::HS512 => {
            let material = secret.get("secret").and_then(Value::as_str).ok_or_else(|| {
                AuthError::AdapterConfig("jwt secret payload missing 'secret'".into())
            })?;
            Ok(DecodingKey::from_secret(material.as_bytes()))
        }
        Algorithm::RS256 | Algorithm::RS512 => {
            let material = secret
                .get("public_key")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AuthError::AdapterConfig("jwt secret payload missing 'public_key'".into())
                })?;
            DecodingKey::from_rsa_pem(material.as_bytes())
                .map_err(|e| AuthError::AdapterConfig(format!("bad RSA public key: {e}")))
        }
        _ => Err(AuthError::AdapterConfig("unsupported algorithm".into())),
    }
}

/// Mint a token with iss/aud/iat/exp from the adapter's settings.
pub fn mint(settings: &JwtSettings, secret: &Value, subject: &str) -> Result<String, AuthError> {
    let algorithm = algorithm_from_str(&settings.algorithm)?;
    let now = now_secs()?;
    let claims = json!({
        "sub": subject,
        "iss": settings.issuer,
        "aud": settings.audience,
        "iat": now,
        "exp": now + settings.expires_in_secs,
    });
    let header = Header::new(algorithm);
    encode(&header, &claims, &encoding_key(algorithm, secret)?)
        .map_err(|e| AuthError::AdapterConfig(format!("failed to sign JWT: {e}")))
}

/// Validate signature, expiry, issuer, and audience; returns the claims.
pub fn validate(
    token: &str,
    settings: &JwtSettings,
    secret: &Value,
) -> Result<Value, AuthError> {
    let algorithm = algorithm_from_str(&settings.algorithm)?;
    let mut validation = Validation::new(algorithm);
    validation.set_issuer(&[&settings.issuer]);
    validation.set_audience(&[&settings.audience]);
    validation.validate_exp = true;

    decode::<Value>(token, &decoding_key(algorithm, secret)?, &validation)
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidCredentials(format!("JWT validation failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> JwtSettings {
        JwtSettings {
            algorithm: "HS256".into(),
            issuer: "manifold".into(),
            audience: "connectors".into(),
            expires_in_secs: 3600,
        }
    }

    #[test]
    fn mint_then_validate_round_trips() {
        let secret = json!({"secret": "hmac-key-for-tests"});
        let token = mint(&settings(), &secret, "adapter-1").unwrap();
        let claims = validate(&token, &settings(), &secret).unwrap();
        assert_eq!(claims["sub"], "adapter-1");
        assert_eq!(claims["iss"], "manifold");
    }

    #[test]
    fn wrong_secret_fails_validation() {
        let token = mint(&settings(), &json!({"secret": "right"}), "s").unwrap();
        let err = validate(&token, &settings(), &json!({"secret": "wrong"})).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
    }

    #[test]
    fn wrong_audience_fails_validation() {
        let secret = json!({"secret": "k"});
        let token = mint(&settings(), &secret, "s").unwrap();
        let mut other = settings();
        other.audience = "somewhere-else".into();
        assert!(validate(&token, &other, &secret).is_err());
    }

    #[test]
    fn unknown_algorithm_is_config_error() {
        assert!(matches!(
            algorithm_from_str("ES256"),
            Err(AuthError::AdapterConfig(_))
        ));
    }
}
