//! Built-in node executors, one per [`NodeKind`].
//!
//! [`NodeKind`]: manifold_core::model::flow::NodeKind

pub mod connect;
pub mod control;
pub mod emit;
pub mod mapper;
pub mod parse;
pub mod triggers;
pub mod validate;

use std::sync::Arc;

use manifold_core::model::flow::NodeKind;

use crate::join::JoinExecutor;
use crate::registry::ExecutorRegistry;

/// Build the registry with every built-in executor. Called once at startup;
/// panics on duplicate registration.
pub fn default_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    let trigger = Arc::new(triggers::TriggerExecutor);
    registry
        .register(NodeKind::WebhookTrigger, trigger.clone())
        .register(NodeKind::ScheduleTrigger, trigger.clone())
        .register(NodeKind::ManualTrigger, trigger.clone())
        .register(NodeKind::SftpPoller, trigger.clone())
        .register(NodeKind::BlobPoller, trigger.clone())
        .register(NodeKind::IngressTrigger, trigger)
        .register(NodeKind::JsonParser, Arc::new(parse::JsonParserExecutor))
        .register(NodeKind::CsvParser, Arc::new(parse::CsvParserExecutor))
        .register(NodeKind::XmlParser, Arc::new(parse::XmlParserExecutor))
        .register(NodeKind::ObjectMapper, Arc::new(mapper::ObjectMapperExecutor))
        .register(
            NodeKind::SchemaValidator,
            Arc::new(validate::SchemaValidatorExecutor),
        )
        .register(NodeKind::Conditional, Arc::new(control::ConditionalExecutor))
        .register(NodeKind::Join, Arc::new(JoinExecutor))
        .register(NodeKind::HttpRequest, Arc::new(connect::HttpRequestExecutor))
        .register(
            NodeKind::HttpDestination,
            Arc::new(connect::HttpDestinationExecutor),
        )
        .register(NodeKind::DbConnector, Arc::new(connect::DbConnectorExecutor))
        .register(
            NodeKind::SftpConnector,
            Arc::new(connect::FileConnectorExecutor),
        )
        .register(
            NodeKind::BlobConnector,
            Arc::new(connect::FileConnectorExecutor),
        )
        .register(
            NodeKind::QueueProducer,
            Arc::new(connect::QueueProducerExecutor),
        )
        .register(NodeKind::Egress, Arc::new(emit::EgressExecutor));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_kind() {
        let registry = default_registry();
        for kind in [
            NodeKind::WebhookTrigger,
            NodeKind::ScheduleTrigger,
            NodeKind::ManualTrigger,
            NodeKind::SftpPoller,
            NodeKind::BlobPoller,
            NodeKind::IngressTrigger,
            NodeKind::JsonParser,
            NodeKind::CsvParser,
            NodeKind::XmlParser,
            NodeKind::ObjectMapper,
            NodeKind::SchemaValidator,
            NodeKind::Conditional,
            NodeKind::Join,
            NodeKind::HttpRequest,
            NodeKind::HttpDestination,
            NodeKind::DbConnector,
            NodeKind::SftpConnector,
            NodeKind::BlobConnector,
            NodeKind::QueueProducer,
            NodeKind::Egress,
        ] {
            assert!(
                registry.executor_for(kind).is_some(),
                "no executor for {kind:?}"
            );
        }
    }
}
