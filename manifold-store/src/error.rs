use manifold_core::{EngineError, ErrorKind};

/// Errors surfaced by storage gateway implementations.
#[derive(Debug)]
pub enum StoreError {
    /// The addressed record does not exist.
    NotFound(String),
    /// A uniqueness or conditional-write constraint was violated.
    Conflict(String),
    /// The backing engine failed (connection, query, pool).
    Backend(String),
    /// A stored JSON column could not be decoded.
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "not found: {what}"),
            StoreError::Conflict(what) => write!(f, "conflict: {what}"),
            StoreError::Backend(msg) => write!(f, "storage backend error: {msg}"),
            StoreError::Corrupt(msg) => write!(f, "corrupt stored record: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::new(ErrorKind::System, err.to_string())
    }
}
