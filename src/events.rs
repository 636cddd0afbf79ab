//! Out-of-band events for the orchestrator.
//!
//! Role changes, sustained probe failures and volume lock transitions are
//! reported as Kubernetes events against the agent's pod. Outside a cluster
//! the [`LogEventSink`] writes them to the log instead.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::{Result, WardenError};

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
pub const DEFAULT_SEND_ATTEMPTS: u32 = 30;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeEvent {
    pub reason: String,
    pub message: String,
    pub event_type: EventType,
}

impl ProbeEvent {
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            event_type: EventType::Normal,
        }
    }

    pub fn warning(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            event_type: EventType::Warning,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &ProbeEvent) -> Result<()>;
}

/// Fire-and-forget send for the probe path; the caller never waits on
/// event delivery.
pub fn spawn_send(sink: Arc<dyn EventSink>, event: ProbeEvent) {
    tokio::spawn(async move {
        if let Err(e) = sink.send(&event).await {
            tracing::error!("[EVENT] failed to send {} event: {}", event.reason, e);
        }
    });
}

pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn send(&self, event: &ProbeEvent) -> Result<()> {
        tracing::info!(
            reason = %event.reason,
            kind = ?event.event_type,
            "[EVENT] {}",
            event.message
        );
        Ok(())
    }
}

/// Posts core/v1 Events to the API server with the pod's service account.
pub struct KubeEventSink {
    http_client: reqwest::Client,
    api_base: String,
    token: String,
    namespace: String,
    pod_name: String,
    node_name: String,
    attempts: u32,
    retry_delay: Duration,
}

impl KubeEventSink {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        config: &AgentConfig,
    ) -> Self {
        let http_client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("[EVENT] failed to build HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            }
        };
        Self::with_client(http_client, api_base, token, config)
    }

    fn with_client(
        http_client: reqwest::Client,
        api_base: impl Into<String>,
        token: impl Into<String>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            namespace: config.namespace.clone(),
            pod_name: config.pod_name.clone(),
            node_name: config.node_name.clone(),
            attempts: DEFAULT_SEND_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Builds a sink from the in-cluster environment. Returns `None` when the
    /// agent is not running inside Kubernetes.
    pub fn in_cluster(config: &AgentConfig) -> Result<Option<Self>> {
        let host = match std::env::var("KUBERNETES_SERVICE_HOST") {
            Ok(h) if !h.is_empty() => h,
            _ => return Ok(None),
        };
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let sa_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(sa_dir.join("token"))?;
        let http_client = service_account_client(sa_dir, Duration::from_secs(5))?;
        Ok(Some(Self::with_client(
            http_client,
            format!("https://{}:{}", host, port),
            token.trim(),
            config,
        )))
    }

    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn event_body(&self, event: &ProbeEvent) -> serde_json::Value {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let suffix: u64 = rand::thread_rng().gen();
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {
                "name": format!("{}.{:x}", self.pod_name, suffix),
                "namespace": self.namespace,
            },
            "involvedObject": {
                "apiVersion": "v1",
                "kind": "Pod",
                "name": self.pod_name,
                "namespace": self.namespace,
                "fieldPath": "spec.containers{warden}",
            },
            "reason": event.reason,
            "message": event.message,
            "type": event.event_type,
            "source": {
                "component": "warden",
                "host": self.node_name,
            },
            "firstTimestamp": now,
            "lastTimestamp": now,
            "count": 1,
        })
    }

    async fn post_once(&self, body: &serde_json::Value) -> Result<()> {
        let url = format!(
            "{}/api/v1/namespaces/{}/events",
            self.api_base, self.namespace
        );
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WardenError::Event(format!(
                "API server returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn send(&self, event: &ProbeEvent) -> Result<()> {
        let body = self.event_body(event);
        let mut last_err = WardenError::Event("no attempt made".into());
        for attempt in 1..=self.attempts {
            match self.post_once(&body).await {
                Ok(()) => {
                    tracing::debug!("[EVENT] sent {} (attempt {})", event.reason, attempt);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("[EVENT] attempt {} for {} failed: {}", attempt, event.reason, e);
                    last_err = e;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(last_err)
    }
}

/// reqwest client trusting the service-account CA bundle.
pub fn service_account_client(sa_dir: &Path, timeout: Duration) -> Result<reqwest::Client> {
    let ca = std::fs::read(sa_dir.join("ca.crt"))?;
    let cert = reqwest::Certificate::from_pem(&ca)?;
    Ok(reqwest::Client::builder()
        .add_root_certificate(cert)
        .timeout(timeout)
        .build()?)
}
