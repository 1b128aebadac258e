use serde::{Deserialize, Serialize};

/// Classification attached to every failed node execution.
///
/// The kind drives local handling in the orchestrator: transient kinds are
/// retried against the node's retry budget, semantic kinds reroute to a
/// failure edge when one exists, unrecoverable kinds terminate the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input failed schema or config validation.
    Validation,
    /// Mapping or parse error.
    Transformation,
    /// Token acquisition or inbound-auth failure.
    Auth,
    /// Transient transport failure.
    Connection,
    /// Deadline exceeded.
    Timeout,
    /// Upstream 429.
    RateLimit,
    /// Upstream semantic rejection (4xx that is not auth or rate limiting).
    BusinessLogic,
    /// Unexpected engine error.
    System,
}

impl ErrorKind {
    /// Whether the orchestrator may retry a node failing with this kind.
    ///
    /// Timeouts and rate limits count against the same retry budget as
    /// connection failures.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::RateLimit
        )
    }

    /// Whether a failure of this kind may reroute to a `Failure`-labeled
    /// edge instead of failing the run.
    pub fn routes_to_failure_edge(self) -> bool {
        !matches!(self, ErrorKind::System)
    }

    /// Classify an upstream HTTP status into the taxonomy.
    ///
    /// 401/403 are auth, 429 is rate limiting, remaining 4xx are semantic
    /// rejections, and 5xx are transient transport failures.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 | 407 => ErrorKind::Auth,
            429 => ErrorKind::RateLimit,
            408 => ErrorKind::Timeout,
            400..=499 => ErrorKind::BusinessLogic,
            _ => ErrorKind::Connection,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transformation => "transformation",
            ErrorKind::Auth => "auth",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::BusinessLogic => "business_logic",
            ErrorKind::System => "system",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by node executors and the orchestrator.
///
/// Carries the taxonomy kind, a human-readable message, and optionally a
/// `Retry-After` hint in seconds when the upstream provided one.
#[derive(Clone, Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    /// Upstream `Retry-After` hint, honored for `rate_limit` failures.
    pub retry_after_secs: Option<u64>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn transformation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transformation, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limit(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self {
            kind: ErrorKind::RateLimit,
            message: message.into(),
            retry_after_secs,
        }
    }

    pub fn business_logic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessLogic, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, message)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Connection.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::BusinessLogic.is_retryable());
        assert!(!ErrorKind::System.is_retryable());
    }

    #[test]
    fn system_errors_never_reroute() {
        assert!(!ErrorKind::System.routes_to_failure_edge());
        assert!(ErrorKind::Validation.routes_to_failure_edge());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        let back: ErrorKind = serde_json::from_str("\"business_logic\"").unwrap();
        assert_eq!(back, ErrorKind::BusinessLogic);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = EngineError::connection("socket reset");
        assert_eq!(err.to_string(), "connection: socket reset");
    }
}
