use manifold_core::{EngineError, ErrorKind};

/// Errors raised by the credential lifecycle and inbound enforcement.
#[derive(Debug)]
pub enum AuthError {
    /// Adapter missing, disabled, or misconfigured.
    AdapterConfig(String),
    /// The token endpoint or login request failed at transport level.
    Upstream(String),
    /// The identity provider rejected the request.
    Rejected(String),
    /// Inbound credentials missing where a policy requires them.
    MissingCredentials(String),
    /// Inbound credentials present but invalid.
    InvalidCredentials(String),
    /// Waiting for a concurrent refresh exceeded its bound.
    RefreshWaitTimeout,
    /// The vault refused to seal/open token material.
    Vault(manifold_vault::VaultError),
    Storage(manifold_store::StoreError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::AdapterConfig(msg) => write!(f, "adapter misconfigured: {msg}"),
            AuthError::Upstream(msg) => write!(f, "credential endpoint unreachable: {msg}"),
            AuthError::Rejected(msg) => write!(f, "credential request rejected: {msg}"),
            AuthError::MissingCredentials(msg) => write!(f, "missing credentials: {msg}"),
            AuthError::InvalidCredentials(msg) => write!(f, "invalid credentials: {msg}"),
            AuthError::RefreshWaitTimeout => write!(f, "timed out waiting for token refresh"),
            AuthError::Vault(err) => write!(f, "vault: {err}"),
            AuthError::Storage(err) => write!(f, "storage: {err}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<manifold_vault::VaultError> for AuthError {
    fn from(err: manifold_vault::VaultError) -> Self {
        AuthError::Vault(err)
    }
}

impl From<manifold_store::StoreError> for AuthError {
    fn from(err: manifold_store::StoreError) -> Self {
        AuthError::Storage(err)
    }
}

impl From<AuthError> for EngineError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Vault(v) => v.into(),
            other => {
                let kind = match &other {
                    AuthError::Upstream(_) => ErrorKind::Connection,
                    AuthError::RefreshWaitTimeout => ErrorKind::Timeout,
                    AuthError::Storage(_) => ErrorKind::System,
                    _ => ErrorKind::Auth,
                };
                EngineError::new(kind, other.to_string())
            }
        }
    }
}
