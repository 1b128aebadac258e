use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Bound on the fingerprint ring when no explicit size is configured.
pub const DEFAULT_FINGERPRINT_RING_SIZE: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerType {
    Sftp,
    Blob,
}

/// How a poller decides that a remote file is new.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Skip files whose name already appears in the ring.
    Filename,
    /// Fetch and hash; skip when (filename, checksum) is already present.
    Checksum,
}

impl Default for TrackingMode {
    fn default() -> Self {
        TrackingMode::Checksum
    }
}

/// One processed file: the dedup unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub filename: String,
    pub checksum: String,
    pub processed_at: DateTime<Utc>,
}

/// Per-(flow, node) poller bookkeeping.
///
/// The fingerprint ring bounds memory: only the most recent entries are
/// retained, oldest evicted first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollerState {
    pub flow_id: Uuid,
    pub node_id: String,
    pub poller_type: PollerType,
    #[serde(default)]
    pub last_file: Option<String>,
    #[serde(default)]
    pub last_processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fingerprints: Vec<FileFingerprint>,
    /// Snapshot of the node config at registration time.
    #[serde(default)]
    pub config_snapshot: Value,
    pub enabled: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
}

impl PollerState {
    pub fn new(flow_id: Uuid, node_id: String, poller_type: PollerType, config: Value) -> Self {
        Self {
            flow_id,
            node_id,
            poller_type,
            last_file: None,
            last_processed_at: None,
            fingerprints: Vec::new(),
            config_snapshot: config,
            enabled: true,
            last_error: None,
            last_error_at: None,
        }
    }

    /// Whether a file has already been processed under the given mode.
    pub fn seen(&self, mode: TrackingMode, filename: &str, checksum: &str) -> bool {
        match mode {
            TrackingMode::Filename => self.fingerprints.iter().any(|f| f.filename == filename),
            TrackingMode::Checksum => self
                .fingerprints
                .iter()
                .any(|f| f.filename == filename && f.checksum == checksum),
        }
    }

    /// Append a fingerprint, evicting the oldest entries past `ring_size`.
    pub fn record(&mut self, filename: String, checksum: String, ring_size: usize) {
        let now = Utc::now();
        self.fingerprints.push(FileFingerprint {
            filename: filename.clone(),
            checksum,
            processed_at: now,
        });
        if self.fingerprints.len() > ring_size {
            let excess = self.fingerprints.len() - ring_size;
            self.fingerprints.drain(..excess);
        }
        self.last_file = Some(filename);
        self.last_processed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> PollerState {
        PollerState::new(Uuid::new_v4(), "poll".into(), PollerType::Sftp, json!({}))
    }

    #[test]
    fn checksum_mode_distinguishes_content() {
        let mut s = state();
        s.record("order1.xml".into(), "h1".into(), 100);
        assert!(s.seen(TrackingMode::Checksum, "order1.xml", "h1"));
        assert!(!s.seen(TrackingMode::Checksum, "order1.xml", "h2"));
        assert!(s.seen(TrackingMode::Filename, "order1.xml", "h2"));
    }

    #[test]
    fn ring_is_bounded() {
        let mut s = state();
        for i in 0..150 {
            s.record(format!("f{i}"), format!("h{i}"), 100);
        }
        assert_eq!(s.fingerprints.len(), 100);
        // Oldest entries were evicted first.
        assert!(!s.seen(TrackingMode::Filename, "f0", ""));
        assert!(s.seen(TrackingMode::Filename, "f149", ""));
        assert_eq!(s.last_file.as_deref(), Some("f149"));
    }
}
