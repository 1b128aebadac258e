use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, ErrorKind};

/// Closed set of node types the executor registry can interpret.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    // Triggers
    WebhookTrigger,
    ScheduleTrigger,
    ManualTrigger,
    SftpPoller,
    BlobPoller,
    IngressTrigger,
    // Parse / transform
    JsonParser,
    CsvParser,
    XmlParser,
    ObjectMapper,
    SchemaValidator,
    // Control flow
    Conditional,
    Join,
    // Connectors
    HttpRequest,
    HttpDestination,
    DbConnector,
    SftpConnector,
    BlobConnector,
    QueueProducer,
    // Terminal emitters
    Egress,
}

impl NodeKind {
    /// Trigger nodes seed a run and accept no inbound edges' payloads.
    pub fn is_trigger(self) -> bool {
        matches!(
            self,
            NodeKind::WebhookTrigger
                | NodeKind::ScheduleTrigger
                | NodeKind::ManualTrigger
                | NodeKind::SftpPoller
                | NodeKind::BlobPoller
                | NodeKind::IngressTrigger
        )
    }

    /// Terminal emitters propagate no outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeKind::Egress)
    }
}

/// Per-node retry budget for transient failures.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a retryable node may run up to
    /// `max_retries + 1` times in total.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// A typed node inside a flow graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the owning flow.
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Kind-specific configuration, validated by the executor.
    #[serde(default)]
    pub config: Value,
    /// Reference to the system instance (auth adapter) providing credentials.
    #[serde(default)]
    pub adapter_id: Option<Uuid>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl Node {
    /// How many retries this node gets for transient failures (default 3).
    pub fn retry_budget(&self) -> u32 {
        self.retry.unwrap_or_default().max_retries
    }
}

/// A directed edge carrying a payload between two nodes.
///
/// The optional label participates in conditional routing (`Success` /
/// `Failure` or boolean strings, compared case-insensitively).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl Edge {
    /// Case-insensitive label comparison used by conditional routing.
    pub fn label_matches(&self, wanted: &str) -> bool {
        self.label
            .as_deref()
            .map(|l| l.eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
    }
}

/// A directed graph of typed nodes defining an integration pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Semantic version, MAJOR.MINOR.PATCH.
    pub version: String,
    pub enabled: bool,
    pub nodes: Vec<Node>,
    /// Ordered: downstream inputs are computed in definition order.
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Flow {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of a node, in definition order.
    pub fn edges_from<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// All trigger nodes in the graph.
    pub fn triggers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind.is_trigger())
    }

    /// Validate the structural invariants of the graph.
    ///
    /// Every edge endpoint must refer to an existing node, node ids must be
    /// unique, self-loops are rejected, and at least one trigger node must be
    /// present. Unreachable nodes are permitted (they are never executed).
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(EngineError::new(
                    ErrorKind::Validation,
                    format!("duplicate node id '{}'", node.id),
                ));
            }
        }
        if !self.nodes.iter().any(|n| n.kind.is_trigger()) {
            return Err(EngineError::new(
                ErrorKind::Validation,
                "flow has no trigger node",
            ));
        }
        for edge in &self.edges {
            if edge.source == edge.target {
                return Err(EngineError::new(
                    ErrorKind::Validation,
                    format!("self-loop on node '{}'", edge.source),
                ));
            }
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(EngineError::new(
                        ErrorKind::Validation,
                        format!("edge references unknown node '{endpoint}'"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, kind: NodeKind) -> Node {
        Node {
            id: id.into(),
            kind,
            name: None,
            config: json!({}),
            adapter_id: None,
            retry: None,
        }
    }

    fn flow(nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
        let now = chrono::Utc::now();
        Flow {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "f".into(),
            version: "1.0.0".into(),
            enabled: true,
            nodes,
            edges,
            tags: vec![],
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            source: source.into(),
            target: target.into(),
            label: None,
        }
    }

    #[test]
    fn valid_graph_passes() {
        let f = flow(
            vec![
                node("in", NodeKind::WebhookTrigger),
                node("out", NodeKind::Egress),
            ],
            vec![edge("in", "out")],
        );
        assert!(f.validate().is_ok());
    }

    #[test]
    fn rejects_missing_trigger() {
        let f = flow(vec![node("a", NodeKind::JsonParser)], vec![]);
        let err = f.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn rejects_self_loop() {
        let f = flow(
            vec![node("a", NodeKind::WebhookTrigger)],
            vec![edge("a", "a")],
        );
        assert!(f.validate().is_err());
    }

    #[test]
    fn rejects_dangling_edge() {
        let f = flow(
            vec![node("a", NodeKind::WebhookTrigger)],
            vec![edge("a", "ghost")],
        );
        assert!(f.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let f = flow(
            vec![
                node("a", NodeKind::WebhookTrigger),
                node("a", NodeKind::Egress),
            ],
            vec![],
        );
        assert!(f.validate().is_err());
    }

    #[test]
    fn unreachable_nodes_are_allowed() {
        let f = flow(
            vec![
                node("in", NodeKind::WebhookTrigger),
                node("island", NodeKind::JsonParser),
            ],
            vec![],
        );
        assert!(f.validate().is_ok());
    }

    #[test]
    fn label_comparison_is_case_insensitive() {
        let e = Edge {
            source: "a".into(),
            target: "b".into(),
            label: Some("Failure".into()),
        };
        assert!(e.label_matches("failure"));
        assert!(e.label_matches("FAILURE"));
        assert!(!e.label_matches("success"));
    }

    #[test]
    fn node_kind_roundtrips_snake_case() {
        let json = serde_json::to_string(&NodeKind::HttpDestination).unwrap();
        assert_eq!(json, "\"http_destination\"");
        let back: NodeKind = serde_json::from_str("\"sftp_poller\"").unwrap();
        assert_eq!(back, NodeKind::SftpPoller);
    }
}
