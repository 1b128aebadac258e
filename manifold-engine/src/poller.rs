//! Poller subsystem: periodic remote-directory watchers producing at most
//! one trigger event per unique file.
//!
//! Transports hide behind [`RemoteDir`]; dedup lives entirely in the
//! fingerprint ring persisted with [`PollerState`]. Delivery is
//! at-least-once — a crash between enqueue and fingerprint persistence
//! re-emits on the next tick, and downstream consumers rely on the
//! fingerprints for idempotency.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use manifold_core::model::event::{IntegrationEvent, IntegrationEventKind};
use manifold_core::model::flow::{Flow, Node, NodeKind};
use manifold_core::model::poller::{PollerState, PollerType, TrackingMode};
use manifold_core::model::run::TriggeredBy;
use manifold_core::model::trigger::{TriggerEvent, TRIGGER_TOPIC};
use manifold_core::{EngineError, ErrorKind};

use crate::scope::EngineServices;

/// Metadata for one remote file.
#[derive(Clone, Debug)]
pub struct RemoteFileMeta {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A listable, fetchable remote directory. SFTP and blob transports
/// implement this; the dedup logic never sees the wire protocol.
#[async_trait]
pub trait RemoteDir: Send + Sync {
    async fn list(&self, pattern: &str) -> Result<Vec<RemoteFileMeta>, EngineError>;
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, EngineError>;
    /// Upload, used by the SFTP/blob connector nodes.
    async fn put(&self, name: &str, content: &[u8]) -> Result<(), EngineError>;
}

/// Glob match supporting `*` (any run of characters) only — poller patterns
/// are file masks like `*.xml`, not full globs.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(pattern: &[u8], name: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], name)
                    || (!name.is_empty() && inner(pattern, &name[1..]))
            }
            (Some(p), Some(n)) if p == n => inner(&pattern[1..], &name[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

/// Local filesystem directory, used by tests and on-host drops.
pub struct LocalDir {
    root: PathBuf,
}

impl LocalDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteDir for LocalDir {
    async fn list(&self, pattern: &str) -> Result<Vec<RemoteFileMeta>, EngineError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| EngineError::connection(format!("list {:?}: {e}", self.root)))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::connection(e.to_string()))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| EngineError::connection(e.to_string()))?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !glob_match(pattern, &name) {
                continue;
            }
            files.push(RemoteFileMeta {
                path: entry.path().to_string_lossy().to_string(),
                name,
                size: meta.len(),
                modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        tokio::fs::read(self.root.join(name))
            .await
            .map_err(|e| EngineError::connection(format!("fetch '{name}': {e}")))
    }

    async fn put(&self, name: &str, content: &[u8]) -> Result<(), EngineError> {
        tokio::fs::write(self.root.join(name), content)
            .await
            .map_err(|e| EngineError::connection(format!("put '{name}': {e}")))
    }
}

/// Blob store over HTTP: `GET {base}?list={pattern}` returns a JSON array of
/// file metadata; `GET|PUT {base}/{name}` moves content. Credentials ride on
/// a query token when configured.
pub struct HttpBlobDir {
    base_url: String,
    http: reqwest::Client,
    sas_token: Option<String>,
}

impl HttpBlobDir {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, sas_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http,
            sas_token,
        }
    }

    fn object_url(&self, name: &str) -> String {
        let mut url = format!("{}/{}", self.base_url.trim_end_matches('/'), name);
        if let Some(token) = &self.sas_token {
            url.push('?');
            url.push_str(token);
        }
        url
    }
}

#[async_trait]
impl RemoteDir for HttpBlobDir {
    async fn list(&self, pattern: &str) -> Result<Vec<RemoteFileMeta>, EngineError> {
        let mut request = self
            .http
            .get(&self.base_url)
            .query(&[("list", pattern)]);
        if let Some(token) = &self.sas_token {
            request = request.query(&[("sas", token.as_str())]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::connection(format!("blob list: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::new(
                ErrorKind::from_http_status(response.status().as_u16()),
                format!("blob list returned {}", response.status()),
            ));
        }
        let raw: Vec<Value> = response
            .json()
            .await
            .map_err(|e| EngineError::transformation(format!("blob list body: {e}")))?;
        Ok(raw
            .into_iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_string();
                Some(RemoteFileMeta {
                    path: item
                        .get("path")
                        .and_then(Value::as_str)
                        .unwrap_or(&name)
                        .to_string(),
                    size: item.get("size").and_then(Value::as_u64).unwrap_or(0),
                    modified_at: item
                        .get("modified_at")
                        .and_then(Value::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                    name,
                })
            })
            .filter(|f| glob_match(pattern, &f.name))
            .collect())
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        let response = self
            .http
            .get(self.object_url(name))
            .send()
            .await
            .map_err(|e| EngineError::connection(format!("blob fetch '{name}': {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::new(
                ErrorKind::from_http_status(response.status().as_u16()),
                format!("blob fetch '{name}' returned {}", response.status()),
            ));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| EngineError::connection(e.to_string()))
    }

    async fn put(&self, name: &str, content: &[u8]) -> Result<(), EngineError> {
        let response = self
            .http
            .put(self.object_url(name))
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| EngineError::connection(format!("blob put '{name}': {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::new(
                ErrorKind::from_http_status(response.status().as_u16()),
                format!("blob put '{name}' returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// In-memory directory for unit tests and local emulation.
#[derive(Default)]
pub struct MemoryDir {
    files: DashMap<String, Vec<u8>>,
}

impl MemoryDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, content: &[u8]) {
        self.files.insert(name.to_string(), content.to_vec());
    }

    pub fn remove(&self, name: &str) {
        self.files.remove(name);
    }
}

#[async_trait]
impl RemoteDir for MemoryDir {
    async fn list(&self, pattern: &str) -> Result<Vec<RemoteFileMeta>, EngineError> {
        let mut files: Vec<RemoteFileMeta> = self
            .files
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| RemoteFileMeta {
                name: entry.key().clone(),
                path: format!("/{}", entry.key()),
                size: entry.value().len() as u64,
                modified_at: None,
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        self.files
            .get(name)
            .map(|c| c.clone())
            .ok_or_else(|| EngineError::connection(format!("file '{name}' gone")))
    }

    async fn put(&self, name: &str, content: &[u8]) -> Result<(), EngineError> {
        self.insert(name, content);
        Ok(())
    }
}

/// Build the transport for a poller or connector node from its config.
pub fn remote_dir_for(node: &Node, http: &reqwest::Client) -> Result<Arc<dyn RemoteDir>, EngineError> {
    if let Some(base_url) = node.config.get("base_url").and_then(Value::as_str) {
        return Ok(Arc::new(HttpBlobDir::new(
            base_url,
            http.clone(),
            node.config
                .get("sas_token")
                .and_then(Value::as_str)
                .map(str::to_string),
        )));
    }
    if let Some(root) = node.config.get("root_path").and_then(Value::as_str) {
        return Ok(Arc::new(LocalDir::new(root)));
    }
    Err(EngineError::validation(
        "poller config needs 'base_url' or 'root_path'",
    ))
}

fn tracking_mode_of(node: &Node) -> TrackingMode {
    match node
        .config
        .get("tracking_mode")
        .and_then(Value::as_str)
        .unwrap_or("checksum")
    {
        "filename" => TrackingMode::Filename,
        _ => TrackingMode::Checksum,
    }
}

pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// The tick body: list, dedup, download, enqueue, persist. Returns the
/// number of trigger events emitted.
async fn run_tick(
    services: &Arc<EngineServices>,
    flow: &Flow,
    node: &Node,
    dir: &dyn RemoteDir,
) -> Result<usize, EngineError> {
    let store = &services.store;
    let poller_type = match node.kind {
        NodeKind::BlobPoller => PollerType::Blob,
        _ => PollerType::Sftp,
    };
    let mut state = store
        .get_poller_state(flow.id, &node.id)
        .await?
        .unwrap_or_else(|| {
            PollerState::new(flow.id, node.id.clone(), poller_type, node.config.clone())
        });
    if !state.enabled {
        return Ok(0);
    }

    let pattern = node
        .config
        .get("pattern")
        .and_then(Value::as_str)
        .unwrap_or("*");
    let mode = tracking_mode_of(node);
    let ring_size = services.config.poller_fingerprint_ring_size;

    let files = match dir.list(pattern).await {
        Ok(files) => files,
        Err(err) => {
            state.last_error = Some(err.message.clone());
            state.last_error_at = Some(Utc::now());
            store.put_poller_state(&state).await?;
            return Err(err);
        }
    };

    let mut emitted = 0;
    for file in files {
        // Filename mode skips without fetching.
        if mode == TrackingMode::Filename && state.seen(mode, &file.name, "") {
            continue;
        }
        let content = match dir.fetch(&file.name).await {
            Ok(content) => content,
            Err(err) => {
                warn!(file = %file.name, error = %err, "poller fetch failed");
                state.last_error = Some(err.message.clone());
                state.last_error_at = Some(Utc::now());
                continue;
            }
        };
        let checksum = sha256_hex(&content);
        if state.seen(mode, &file.name, &checksum) {
            continue;
        }

        let event = TriggerEvent {
            flow_id: flow.id,
            node_id: Some(node.id.clone()),
            triggered_by: TriggeredBy::Interface,
            input: json!({
                "file": {
                    "name": file.name,
                    "path": file.path,
                    "content": String::from_utf8_lossy(&content),
                    "size": file.size,
                    "modifiedAt": file.modified_at.map(|dt| dt.to_rfc3339()),
                },
                "_metadata": {
                    "pollerId": node.id,
                    "trackingMode": match mode {
                        TrackingMode::Filename => "filename",
                        TrackingMode::Checksum => "checksum",
                    },
                    "checksum": checksum,
                },
            }),
            trace_id: Uuid::new_v4().to_string(),
            emulation: false,
        };
        services
            .queue
            .enqueue(
                TRIGGER_TOPIC,
                serde_json::to_value(&event).map_err(|e| EngineError::system(e.to_string()))?,
            )
            .await
            .map_err(|e| EngineError::connection(e.to_string()))?;

        // Fingerprint persists after the enqueue: a crash in between
        // re-emits the file (at-least-once), never loses it.
        state.record(file.name.clone(), checksum, ring_size);
        state.last_error = None;
        state.last_error_at = None;
        store.put_poller_state(&state).await?;
        emitted += 1;

        let audit = IntegrationEvent::now(
            flow.id,
            None,
            Some(node.id.clone()),
            IntegrationEventKind::PollerFileDetected,
            json!({"file": state.last_file}),
        );
        if let Err(err) = store.append_event(&audit).await {
            error!(error = %err, "failed to append poller event");
        }
    }
    if emitted == 0 {
        // Persist list errors cleared by a clean pass.
        store.put_poller_state(&state).await?;
    }
    Ok(emitted)
}

/// Drives poller nodes: one periodic task per enabled (flow, node).
pub struct PollerService {
    services: Arc<EngineServices>,
    loops: DashMap<(Uuid, String), CancellationToken>,
    cancel: CancellationToken,
}

impl PollerService {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self {
            services,
            loops: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// One tick of a single poller node.
    pub async fn tick(
        &self,
        flow: &Flow,
        node: &Node,
        dir: &dyn RemoteDir,
    ) -> Result<usize, EngineError> {
        run_tick(&self.services, flow, node, dir).await
    }

    /// Start periodic loops for every enabled poller node of a flow.
    pub fn register_flow(&self, flow: &Flow) {
        self.unregister_flow(flow.id);
        if !flow.enabled {
            return;
        }
        for node in &flow.nodes {
            if !matches!(node.kind, NodeKind::SftpPoller | NodeKind::BlobPoller) {
                continue;
            }
            let interval = node
                .config
                .get("interval_minutes")
                .and_then(Value::as_u64)
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(self.services.config.poller_default_interval);
            let dir = match remote_dir_for(node, &self.services.http) {
                Ok(dir) => dir,
                Err(err) => {
                    warn!(flow_id = %flow.id, node_id = %node.id, error = %err, "poller not started");
                    continue;
                }
            };

            let token = self.cancel.child_token();
            self.loops
                .insert((flow.id, node.id.clone()), token.clone());
            info!(flow_id = %flow.id, node_id = %node.id, interval_secs = interval.as_secs(), "poller started");

            let services = self.services.clone();
            let flow = flow.clone();
            let node = node.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            match run_tick(&services, &flow, &node, dir.as_ref()).await {
                                Ok(emitted) if emitted > 0 => {
                                    debug!(node_id = %node.id, emitted, "poller tick");
                                }
                                Ok(_) => {}
                                Err(err) => {
                                    warn!(node_id = %node.id, error = %err, "poller tick failed, retrying next interval");
                                }
                            }
                        }
                    }
                }
            });
        }
    }

    pub fn unregister_flow(&self, flow_id: Uuid) {
        let keys: Vec<(Uuid, String)> = self
            .loops
            .iter()
            .filter(|entry| entry.key().0 == flow_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, token)) = self.loops.remove(&key) {
                token.cancel();
            }
        }
    }

    /// Start loops for every enabled flow. Called at startup.
    pub async fn register_all(&self, flows: &[Flow]) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for flow in flows {
            self.register_flow(flow);
            let pollers = flow
                .nodes
                .iter()
                .filter(|n| matches!(n.kind, NodeKind::SftpPoller | NodeKind::BlobPoller))
                .count();
            if pollers > 0 {
                counts.insert(flow.id, pollers);
            }
        }
        counts
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.loops.clear();
    }
}
