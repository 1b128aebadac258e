use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorKind;

/// Triage lifecycle of an error report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    New,
    Investigating,
    Resolved,
    Ignored,
    Escalated,
}

impl TriageStatus {
    /// Allowed transitions: `new → investigating → resolved | ignored |
    /// escalated`. Terminal states accept no further transitions.
    pub fn can_transition_to(self, next: TriageStatus) -> bool {
        match self {
            TriageStatus::New => matches!(next, TriageStatus::Investigating),
            TriageStatus::Investigating => matches!(
                next,
                TriageStatus::Resolved | TriageStatus::Ignored | TriageStatus::Escalated
            ),
            _ => false,
        }
    }
}

/// Technical half of an error report: everything an operator needs to
/// reproduce the failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TechnicalDetail {
    pub error: String,
    pub error_kind: ErrorKind,
    pub config_snapshot: Value,
    pub payload_snapshot: Value,
}

/// Captured when a run fails: a human-readable summary next to the full
/// technical record, with a triage status for follow-up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: Uuid,
    pub run_id: Uuid,
    pub flow_id: Uuid,
    pub node_id: String,
    /// e.g. "Validation node: order_id is missing".
    pub summary: String,
    pub technical: TechnicalDetail,
    pub status: TriageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triage_transitions() {
        assert!(TriageStatus::New.can_transition_to(TriageStatus::Investigating));
        assert!(!TriageStatus::New.can_transition_to(TriageStatus::Resolved));
        assert!(TriageStatus::Investigating.can_transition_to(TriageStatus::Resolved));
        assert!(TriageStatus::Investigating.can_transition_to(TriageStatus::Ignored));
        assert!(TriageStatus::Investigating.can_transition_to(TriageStatus::Escalated));
        assert!(!TriageStatus::Resolved.can_transition_to(TriageStatus::Investigating));
        assert!(!TriageStatus::Ignored.can_transition_to(TriageStatus::New));
    }
}
