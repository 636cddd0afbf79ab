use axum::{routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden::dcs::{Dcs, StaticDcs};
use warden::engine::{DbManager, ManagerRegistry};
use warden::events::{EventSink, KubeEventSink, LogEventSink};
use warden::volume::{KubeletStatsRequester, Protection, SharedProtection};
use warden::{AgentConfig, Dispatcher, OperationContext};

use crate::handlers::{health, invoke_binding, AppState};
use crate::volume_loop::spawn_volume_protection;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3501";

/// Runs the agent with no engine adapters registered.
pub async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    serve_with(ManagerRegistry::new()).await
}

/// Runs the agent, resolving the database manager from `registry`.
pub async fn serve_with(registry: ManagerRegistry) -> Result<(), Box<dyn std::error::Error>> {
    let startup_start = std::time::Instant::now();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env()?;
    let data_dir = std::env::var("WARDEN_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let bind_addr =
        std::env::var("WARDEN_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

    let manager = registry.create(&config)?;
    let dcs: Arc<dyn Dcs> = Arc::new(StaticDcs::load_or_default(Path::new(&data_dir)));
    let events = event_sink(&config);

    let protection = match &config.volume_protection_spec {
        Some(raw) => match KubeletStatsRequester::in_cluster(&config) {
            Ok(requester) => Some(
                Protection::from_spec_json(&config.pod_name, raw, Arc::new(requester))?
                    .with_manager(manager.clone())
                    .with_events(Some(events.clone()))
                    .into_shared(),
            ),
            Err(e) => {
                tracing::warn!("[VOLUME] volume protection disabled: {}", e);
                None
            }
        },
        None => {
            tracing::info!("[VOLUME] volume protection disabled (no spec)");
            None
        }
    };

    if let Some(p) = &protection {
        spawn_volume_protection(Arc::clone(p), config.volume_protection_interval_secs);
    }

    tracing::info!(
        engine = %config.engine,
        workload = %config.workload,
        member = %config.pod_name,
        manager = manager.is_some(),
        "Agent configuration loaded"
    );

    let state = build_state(config, manager, dcs, events, protection);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        "Probe server listening on {} (ready in {}ms)",
        listener.local_addr()?,
        startup_start.elapsed().as_millis()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wires the dispatcher with every built-in operation.
pub fn build_state(
    config: AgentConfig,
    manager: Option<Arc<dyn DbManager>>,
    dcs: Arc<dyn Dcs>,
    events: Arc<dyn EventSink>,
    protection: Option<SharedProtection>,
) -> Arc<AppState> {
    let ctx = OperationContext::new(config)
        .with_manager(manager)
        .with_dcs(Some(dcs))
        .with_events(Some(events));
    let dispatcher = Dispatcher::with_builtin(ctx, protection.clone());
    Arc::new(AppState::new(dispatcher, protection))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/v1.0/bindings/:character_type",
            get(invoke_binding).post(invoke_binding),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn event_sink(config: &AgentConfig) -> Arc<dyn EventSink> {
    match KubeEventSink::in_cluster(config) {
        Ok(Some(sink)) => {
            tracing::info!("[EVENT] Kubernetes event reporting enabled");
            Arc::new(sink)
        }
        Ok(None) => {
            tracing::info!("[EVENT] not running in a cluster, events are logged only");
            Arc::new(LogEventSink)
        }
        Err(e) => {
            tracing::warn!("[EVENT] Kubernetes event sink unavailable: {}", e);
            Arc::new(LogEventSink)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining probe server");
}
