use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Major,
    Minor,
    Patch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Approved,
    Deployed,
    RolledBack,
}

/// An immutable snapshot of a flow at a point in its version history.
///
/// Deploying a version replaces the live flow definition and re-registers
/// scheduler jobs; rolling back deploys the previously deployed snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowVersion {
    pub id: Uuid,
    pub flow_id: Uuid,
    /// Semantic version computed from the flow's current version + change type.
    pub version: String,
    pub change_type: ChangeType,
    pub change_description: String,
    pub status: VersionStatus,
    pub environment: Environment,
    /// Full flow JSON at snapshot time.
    pub snapshot: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

/// Bump a MAJOR.MINOR.PATCH string. Malformed versions restart at 1.0.0.
pub fn bump_version(current: &str, change: ChangeType) -> String {
    let mut parts = current
        .split('.')
        .map(|p| p.parse::<u64>().unwrap_or(0))
        .chain(std::iter::repeat(0));
    let (major, minor, patch) = (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    );
    if current.split('.').count() != 3 || current.split('.').any(|p| p.parse::<u64>().is_err()) {
        return "1.0.0".to_string();
    }
    match change {
        ChangeType::Major => format!("{}.0.0", major + 1),
        ChangeType::Minor => format!("{major}.{}.0", minor + 1),
        ChangeType::Patch => format!("{major}.{minor}.{}", patch + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_each_position() {
        assert_eq!(bump_version("1.2.3", ChangeType::Major), "2.0.0");
        assert_eq!(bump_version("1.2.3", ChangeType::Minor), "1.3.0");
        assert_eq!(bump_version("1.2.3", ChangeType::Patch), "1.2.4");
    }

    #[test]
    fn malformed_version_restarts() {
        assert_eq!(bump_version("banana", ChangeType::Patch), "1.0.0");
        assert_eq!(bump_version("1.2", ChangeType::Patch), "1.0.0");
    }
}
