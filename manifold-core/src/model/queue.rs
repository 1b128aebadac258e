use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single-row record of which queue backend is live.
///
/// Switching backends writes a new `current` and moves the old one to
/// `previous`, which is what a rollback redeploys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueSwitch {
    pub current: String,
    #[serde(default)]
    pub previous: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl QueueSwitch {
    pub fn initial(backend: &str) -> Self {
        Self {
            current: backend.to_string(),
            previous: None,
            changed_at: Utc::now(),
        }
    }

    /// Record a switch to a new backend, retaining the old one for rollback.
    pub fn switch_to(&self, backend: &str) -> Self {
        Self {
            current: backend.to_string(),
            previous: Some(self.current.clone()),
            changed_at: Utc::now(),
        }
    }
}
