//! Error report construction for failed runs: a plain-language summary an
//! operator can triage, next to the full technical record.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use manifold_core::model::flow::{Node, NodeKind};
use manifold_core::model::report::{ErrorReport, TechnicalDetail, TriageStatus};
use manifold_core::model::run::FlowRun;
use manifold_core::EngineError;

/// Human name of a node kind, as it reads in a report summary.
fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::WebhookTrigger => "Webhook trigger",
        NodeKind::ScheduleTrigger => "Schedule trigger",
        NodeKind::ManualTrigger => "Manual trigger",
        NodeKind::SftpPoller => "SFTP poller",
        NodeKind::BlobPoller => "Blob poller",
        NodeKind::IngressTrigger => "Ingress trigger",
        NodeKind::JsonParser => "JSON parser",
        NodeKind::CsvParser => "CSV parser",
        NodeKind::XmlParser => "XML parser",
        NodeKind::ObjectMapper => "Object mapper",
        NodeKind::SchemaValidator => "Validation",
        NodeKind::Conditional => "Conditional",
        NodeKind::Join => "Join",
        NodeKind::HttpRequest => "HTTP request",
        NodeKind::HttpDestination => "HTTP destination",
        NodeKind::DbConnector => "Database connector",
        NodeKind::SftpConnector => "SFTP connector",
        NodeKind::BlobConnector => "Blob connector",
        NodeKind::QueueProducer => "Queue producer",
        NodeKind::Egress => "Egress",
    }
}

/// Build the report captured when a run fails.
pub fn build_error_report(
    run: &FlowRun,
    node: Option<&Node>,
    err: &EngineError,
    payload: &Value,
) -> ErrorReport {
    let summary = match node {
        Some(node) => format!("{} node: {}", kind_label(node.kind), err.message),
        None => format!("Engine: {}", err.message),
    };
    let now = Utc::now();
    ErrorReport {
        id: Uuid::new_v4(),
        run_id: run.id,
        flow_id: run.flow_id,
        node_id: run.error_node.clone().unwrap_or_default(),
        summary,
        technical: TechnicalDetail {
            error: err.message.clone(),
            error_kind: err.kind,
            config_snapshot: node.map(|n| n.config.clone()).unwrap_or(Value::Null),
            payload_snapshot: payload.clone(),
        },
        status: TriageStatus::New,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_core::model::run::TriggeredBy;
    use serde_json::json;

    #[test]
    fn summary_reads_like_an_operator_message() {
        let mut run = FlowRun::start(
            Uuid::new_v4(),
            "1.0.0".into(),
            "t".into(),
            TriggeredBy::Webhook,
            json!({}),
        );
        run.fail("validate-order", "order_id is missing");

        let node = Node {
            id: "validate-order".into(),
            kind: NodeKind::SchemaValidator,
            name: None,
            config: json!({"mode": "strict"}),
            adapter_id: None,
            retry: None,
        };
        let err = EngineError::validation("order_id is missing");
        let report = build_error_report(&run, Some(&node), &err, &json!({"score": 1}));

        assert_eq!(report.summary, "Validation node: order_id is missing");
        assert_eq!(report.status, TriageStatus::New);
        assert_eq!(report.node_id, "validate-order");
        assert_eq!(report.technical.config_snapshot["mode"], "strict");
        assert_eq!(report.technical.payload_snapshot["score"], 1);
    }
}
