//! Manifold engine server.
//!
//! Startup order: configuration → storage → queue (with switch record) →
//! vault (optional auto-unlock) → executor registry → orchestrator →
//! background loops (worker, join sweeper, token sweeper, pollers,
//! scheduler) → HTTP. A fatal initialization failure exits non-zero;
//! shutdown drains through one cancellation token.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use manifold_auth::{PolicyEngine, TokenService, TokenServiceConfig};
use manifold_core::config::QueueBackendKind;
use manifold_core::model::queue::QueueSwitch;
use manifold_core::EngineConfig;
use manifold_engine::{
    default_registry, EngineServices, JoinSweeper, Orchestrator, PollerService, TriggerWorker,
};
use manifold_http::AppState;
use manifold_queue::{KafkaQueue, MemoryQueue, QueueBackend, RabbitMqQueue};
use manifold_scheduler::ScheduleRegistry;
use manifold_store::{MemoryStore, PgStore, StorageGateway};
use manifold_vault::Vault;

/// Join sweeper interval.
const JOIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Proactive token refresh interval.
const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn build_store(config: &EngineConfig) -> Result<Arc<dyn StorageGateway>, String> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .map_err(|e| format!("storage unreachable: {e}"))?;
            info!("connected to postgres storage");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_queue(
    config: &EngineConfig,
    store: &Arc<dyn StorageGateway>,
) -> Result<Arc<dyn QueueBackend>, String> {
    let queue: Arc<dyn QueueBackend> = match config.queue_backend {
        QueueBackendKind::InMemory => Arc::new(MemoryQueue::new()),
        QueueBackendKind::RabbitMq => {
            let url = config
                .queue_url
                .as_deref()
                .ok_or_else(|| "QUEUE_URL required for rabbitmq".to_string())?;
            Arc::new(
                RabbitMqQueue::connect(url)
                    .await
                    .map_err(|e| format!("rabbitmq unreachable: {e}"))?,
            )
        }
        QueueBackendKind::Kafka => {
            let brokers = config
                .queue_url
                .as_deref()
                .ok_or_else(|| "QUEUE_URL required for kafka".to_string())?;
            Arc::new(
                KafkaQueue::connect(brokers, "manifold-engine")
                    .map_err(|e| format!("kafka unreachable: {e}"))?,
            )
        }
    };

    // Record the backend switch, keeping the previous one for rollback.
    let switch = match store
        .get_queue_switch()
        .await
        .map_err(|e| format!("queue switch read failed: {e}"))?
    {
        None => QueueSwitch::initial(queue.kind()),
        Some(current) if current.current != queue.kind() => {
            info!(
                from = %current.current,
                to = %queue.kind(),
                "queue backend switched"
            );
            current.switch_to(queue.kind())
        }
        Some(current) => current,
    };
    store
        .put_queue_switch(&switch)
        .await
        .map_err(|e| format!("queue switch write failed: {e}"))?;

    Ok(queue)
}

async fn run() -> Result<(), String> {
    let config = EngineConfig::from_env().map_err(|e| e.to_string())?;

    let store = build_store(&config).await?;
    let queue = build_queue(&config, &store).await?;

    let vault = Arc::new(Vault::new(store.clone()));
    if let Some(seed) = &config.vault_auto_unlock_seed {
        match vault.unlock(seed).await {
            Ok(()) => info!("vault auto-unlocked"),
            Err(err) => warn!(error = %err, "vault auto-unlock failed, starting locked"),
        }
    }

    let tokens = Arc::new(TokenService::new(
        store.clone(),
        vault.clone(),
        TokenServiceConfig {
            refresh_skew: config.token_refresh_skew,
            stuck_threshold: config.token_refresh_stuck_threshold,
            waiter_deadline: Duration::from_secs(15),
        },
    ));

    let services = Arc::new(EngineServices {
        store: store.clone(),
        vault: vault.clone(),
        tokens: tokens.clone(),
        queue: queue.clone(),
        http: reqwest::Client::new(),
        config: config.clone(),
    });

    let registry = Arc::new(default_registry());
    let orchestrator = Arc::new(Orchestrator::new(services.clone(), registry));
    let scheduler = Arc::new(ScheduleRegistry::new(queue.clone()));
    let pollers = Arc::new(PollerService::new(services.clone()));

    let shutdown = CancellationToken::new();

    // Worker: one owner per run, trigger to terminal.
    let worker = Arc::new(TriggerWorker::new(orchestrator.clone()));
    worker
        .start(queue.as_ref())
        .await
        .map_err(|e| format!("worker subscribe failed: {e}"))?;

    // Background loops.
    let sweeper = Arc::new(JoinSweeper::new(store.clone(), queue.clone()));
    sweeper.clone().spawn(JOIN_SWEEP_INTERVAL, shutdown.child_token());
    tokens
        .clone()
        .spawn_sweeper(TOKEN_SWEEP_INTERVAL, shutdown.child_token());

    // Re-register scheduler jobs and poller loops for enabled flows.
    scheduler
        .register_all(store.as_ref())
        .await
        .map_err(|e| format!("scheduler startup failed: {e}"))?;
    let flows = store
        .list_enabled_flows()
        .await
        .map_err(|e| format!("flow listing failed: {e}"))?;
    pollers.register_all(&flows).await;

    let state = AppState {
        store,
        vault,
        queue: queue.clone(),
        orchestrator,
        scheduler: scheduler.clone(),
        pollers: pollers.clone(),
        policies: Arc::new(PolicyEngine::new(services.store.clone(), services.vault.clone())),
    };
    let app = manifold_http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr)
        .await
        .map_err(|e| format!("cannot bind {}: {e}", config.http_bind_addr))?;
    info!(addr = %config.http_bind_addr, "manifold engine listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = serve_shutdown.cancelled() => {}
            }
        })
        .await
        .map_err(|e| format!("server error: {e}"))?;

    info!("shutting down");
    shutdown.cancel();
    scheduler.shutdown();
    pollers.shutdown();
    queue.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!(%message, "fatal initialization failure");
            ExitCode::FAILURE
        }
    }
}
