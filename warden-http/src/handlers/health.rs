use axum::{extract::State, Json};
use std::sync::Arc;

use super::AppState;

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let ctx = state.dispatcher.context();

    Json(serde_json::json!({
        "status": "ok",
        "engine": ctx.config.engine,
        "workload": ctx.config.workload,
        "member": ctx.config.pod_name,
        "manager_registered": ctx.manager.is_some(),
        "volume_protection": state.protection.is_some(),
        "operations": state.dispatcher.operations(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;
    use warden::engine::DbManager;
    use warden::testing::FakeManager;
    use warden::{AgentConfig, Dispatcher, OperationContext};

    fn make_health_state(manager: Option<Arc<dyn DbManager>>) -> Arc<AppState> {
        let ctx = OperationContext::new(AgentConfig {
            engine: "mysql".into(),
            pod_name: "mysql-0".into(),
            ..Default::default()
        })
        .with_manager(manager);
        Arc::new(AppState::new(Dispatcher::with_builtin(ctx, None), None))
    }

    async fn get_health(state: Arc<AppState>) -> serde_json::Value {
        let app = Router::new()
            .route("/health", get(health))
            .with_state(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_engine_and_manager() {
        let json = get_health(make_health_state(Some(Arc::new(FakeManager::new("mysql-0"))))).await;

        assert_eq!(json["status"], "ok");
        assert_eq!(json["engine"], "mysql");
        assert_eq!(json["workload"], "replication");
        assert_eq!(json["member"], "mysql-0");
        assert_eq!(json["manager_registered"], true);
        assert_eq!(json["volume_protection"], false);
        assert_eq!(json["operations"].as_array().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn health_without_manager() {
        let json = get_health(make_health_state(None)).await;
        assert_eq!(json["manager_registered"], false);
        assert!(
            json["uptime_secs"].as_u64().is_some(),
            "should have uptime_secs field"
        );
    }

    #[tokio::test]
    async fn health_includes_version() {
        let json = get_health(make_health_state(None)).await;
        assert_eq!(
            json["version"].as_str().unwrap(),
            env!("CARGO_PKG_VERSION"),
            "version should match CARGO_PKG_VERSION"
        );
    }
}
