//! # manifold-scheduler — cron-driven flow triggering
//!
//! Jobs are registered per (flow, scheduler node) on flow save/update, not
//! on execution. Each fire enqueues a [`TriggerEvent`] on the queue;
//! enabling or disabling the node (or its flow) toggles the job. On startup
//! every enabled flow is re-registered from storage.
//!
//! Cron expressions use the 6-field seconds-first form; the common 5-field
//! form is accepted and normalized with a `0` seconds column. Schedules
//! evaluate in UTC, with an optional fixed `utc_offset_minutes` in the node
//! config for operators running day-boundary jobs away from UTC.
//!
//! [`TriggerEvent`]: manifold_core::model::trigger::TriggerEvent

use std::str::FromStr;
use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use cron::Schedule;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use manifold_core::model::flow::{Flow, Node, NodeKind};
use manifold_core::model::run::TriggeredBy;
use manifold_core::model::trigger::{TriggerEvent, TRIGGER_TOPIC};
use manifold_queue::QueueBackend;
use manifold_store::StorageGateway;

/// Information about one registered job, for admin listings.
#[derive(Clone, Debug)]
pub struct ScheduledJobInfo {
    pub flow_id: Uuid,
    pub node_id: String,
    pub expression: String,
}

struct JobHandle {
    cancel: CancellationToken,
    expression: String,
}

/// Registry of live cron jobs keyed by (flow, node).
pub struct ScheduleRegistry {
    queue: Arc<dyn QueueBackend>,
    jobs: DashMap<(Uuid, String), JobHandle>,
    cancel: CancellationToken,
}

impl ScheduleRegistry {
    pub fn new(queue: Arc<dyn QueueBackend>) -> Self {
        Self {
            queue,
            jobs: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Re-register all scheduler nodes of a flow, dropping jobs for nodes
    /// that no longer exist or were disabled.
    pub fn register_flow(&self, flow: &Flow) {
        self.unregister_flow(flow.id);
        if !flow.enabled {
            return;
        }
        for node in &flow.nodes {
            if node.kind != NodeKind::ScheduleTrigger {
                continue;
            }
            if !node_enabled(node) {
                debug!(flow_id = %flow.id, node_id = %node.id, "scheduler node disabled");
                continue;
            }
            match self.spawn_job(flow.id, node) {
                Ok(()) => {}
                Err(reason) => {
                    warn!(flow_id = %flow.id, node_id = %node.id, %reason, "skipping scheduler node");
                }
            }
        }
    }

    /// Drop every job belonging to a flow.
    pub fn unregister_flow(&self, flow_id: Uuid) {
        let keys: Vec<(Uuid, String)> = self
            .jobs
            .iter()
            .filter(|entry| entry.key().0 == flow_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, handle)) = self.jobs.remove(&key) {
                handle.cancel.cancel();
            }
        }
    }

    /// Register every enabled flow found in storage. Called once at startup.
    pub async fn register_all(
        &self,
        store: &dyn StorageGateway,
    ) -> Result<usize, manifold_store::StoreError> {
        let flows = store.list_enabled_flows().await?;
        let mut registered = 0;
        for flow in &flows {
            self.register_flow(flow);
            registered += flow
                .nodes
                .iter()
                .filter(|n| n.kind == NodeKind::ScheduleTrigger && node_enabled(n))
                .count();
        }
        info!(jobs = registered, "scheduler jobs registered");
        Ok(registered)
    }

    pub fn jobs(&self) -> Vec<ScheduledJobInfo> {
        self.jobs
            .iter()
            .map(|entry| ScheduledJobInfo {
                flow_id: entry.key().0,
                node_id: entry.key().1.clone(),
                expression: entry.value().expression.clone(),
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        for entry in self.jobs.iter() {
            entry.value().cancel.cancel();
        }
        self.jobs.clear();
    }

    fn spawn_job(&self, flow_id: Uuid, node: &Node) -> Result<(), String> {
        let expression = node
            .config
            .get("cron")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing 'cron' in config".to_string())?;
        let normalized = normalize_cron(expression);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| format!("bad cron expression: {e}"))?;
        let offset_minutes = node
            .config
            .get("utc_offset_minutes")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let offset = FixedOffset::east_opt((offset_minutes * 60) as i32)
            .ok_or_else(|| "utc_offset_minutes out of range".to_string())?;

        let job_cancel = self.cancel.child_token();
        let handle = JobHandle {
            cancel: job_cancel.clone(),
            expression: normalized.clone(),
        };
        self.jobs.insert((flow_id, node.id.clone()), handle);

        let queue = self.queue.clone();
        let node_id = node.id.clone();
        info!(%flow_id, node_id = %node_id, cron = %normalized, "scheduler job started");
        tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&offset);
                let Some(next) = schedule.after(&now).next() else {
                    warn!(%flow_id, node_id = %node_id, "cron schedule has no further fire times");
                    break;
                };
                let wait = (next.with_timezone(&Utc) - Utc::now())
                    .to_std()
                    .unwrap_or_default();
                tokio::select! {
                    _ = job_cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                let event = TriggerEvent {
                    flow_id,
                    node_id: Some(node_id.clone()),
                    triggered_by: TriggeredBy::Schedule,
                    input: json!({
                        "scheduledFor": next.with_timezone(&Utc).to_rfc3339(),
                    }),
                    trace_id: Uuid::new_v4().to_string(),
                    emulation: false,
                };
                if let Err(err) = queue
                    .enqueue(TRIGGER_TOPIC, serde_json::to_value(&event).unwrap_or_default())
                    .await
                {
                    error!(%flow_id, node_id = %node_id, error = %err, "failed to enqueue cron trigger");
                }
            }
            debug!(%flow_id, node_id = %node_id, "scheduler job stopped");
        });
        Ok(())
    }
}

fn node_enabled(node: &Node) -> bool {
    node.config
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Accept both 5-field (minutes-first) and 6/7-field (seconds-first) forms.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use manifold_core::model::flow::Edge;
    use manifold_queue::{Delivery, Disposition, QueueError, QueueHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingQueue {
        enqueued: Mutex<Vec<(String, Value)>>,
        count: AtomicUsize,
    }

    #[async_trait]
    impl QueueBackend for RecordingQueue {
        async fn enqueue(&self, topic: &str, payload: Value) -> Result<(), QueueError> {
            self.enqueued
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _handler: Arc<dyn QueueHandler>,
        ) -> Result<(), QueueError> {
            Ok(())
        }

        fn shutdown(&self) {}

        fn kind(&self) -> &'static str {
            "recording"
        }
    }

    fn schedule_flow(cron: &str) -> Flow {
        let now = Utc::now();
        Flow {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "nightly".into(),
            version: "1.0.0".into(),
            enabled: true,
            nodes: vec![Node {
                id: "tick".into(),
                kind: NodeKind::ScheduleTrigger,
                name: None,
                config: json!({"cron": cron}),
                adapter_id: None,
                retry: None,
            }],
            edges: Vec::<Edge>::new(),
            tags: vec![],
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn every_second_cron_fires() {
        let queue = Arc::new(RecordingQueue::default());
        let registry = ScheduleRegistry::new(queue.clone());
        registry.register_flow(&schedule_flow("* * * * * *"));

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        registry.shutdown();

        let fired = queue.count.load(Ordering::SeqCst);
        assert!(fired >= 1, "expected at least one fire, got {fired}");
        let enqueued = queue.enqueued.lock().unwrap();
        let (topic, payload) = &enqueued[0];
        assert_eq!(topic, TRIGGER_TOPIC);
        assert_eq!(payload["triggered_by"], "schedule");
        assert_eq!(payload["node_id"], "tick");
    }

    #[tokio::test]
    async fn five_field_expressions_are_normalized() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 */5 * * * *"), "0 */5 * * * *");
    }

    #[tokio::test]
    async fn reregistering_replaces_jobs() {
        let queue = Arc::new(RecordingQueue::default());
        let registry = ScheduleRegistry::new(queue.clone());
        let flow = schedule_flow("0 0 * * * *");
        registry.register_flow(&flow);
        assert_eq!(registry.jobs().len(), 1);

        // Same flow re-registered: still exactly one job.
        registry.register_flow(&flow);
        assert_eq!(registry.jobs().len(), 1);

        // Disabled flow: jobs drop.
        let mut disabled = flow.clone();
        disabled.enabled = false;
        registry.register_flow(&disabled);
        assert_eq!(registry.jobs().len(), 0);
        registry.shutdown();
    }

    #[tokio::test]
    async fn bad_cron_is_skipped_not_fatal() {
        let queue = Arc::new(RecordingQueue::default());
        let registry = ScheduleRegistry::new(queue);
        registry.register_flow(&schedule_flow("not a cron"));
        assert_eq!(registry.jobs().len(), 0);
    }

    #[tokio::test]
    async fn disabled_node_is_not_registered() {
        let queue = Arc::new(RecordingQueue::default());
        let registry = ScheduleRegistry::new(queue);
        let mut flow = schedule_flow("0 0 * * * *");
        flow.nodes[0].config = json!({"cron": "0 0 * * * *", "enabled": false});
        registry.register_flow(&flow);
        assert_eq!(registry.jobs().len(), 0);
    }
}
