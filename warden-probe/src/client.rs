use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use warden::probe::{ops, OpsEvent, OpsResult, ProbeRequest, META_STATUS_CODE};

use crate::cache::{request_key, RawResponse, ResponseCache};
use crate::config::ClientConfig;
use crate::error::{ProbeError, Result};

/// Probe client for a single agent.
///
/// Each call runs on a detached task bounded by `request_timeout` while the
/// caller waits at most `reconcile_timeout`. A response that lands after the
/// caller gave up is cached and handed to the next identical call.
pub struct ProbeClient {
    base_url: String,
    config: ClientConfig,
    http_client: reqwest::Client,
    cache: Arc<ResponseCache>,
}

impl ProbeClient {
    pub fn new(base_url: impl Into<String>, config: ClientConfig) -> Self {
        let http_client = match reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(
                    "[PROBE] failed to build HTTP client, using defaults with per-request {:?} timeout: {}",
                    config.request_timeout,
                    e
                );
                reqwest::Client::new()
            }
        };

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
            http_client,
            cache: Arc::new(ResponseCache::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cached_responses(&self) -> usize {
        self.cache.len()
    }

    fn binding_url(&self, operation: &str) -> String {
        format!(
            "{}/v1.0/bindings/{}?operation={}",
            self.base_url, self.config.character_type, operation
        )
    }

    /// Sends an operation and returns the agent's result envelope as is.
    pub async fn request(
        &self,
        operation: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<OpsResult> {
        let req = ProbeRequest {
            operation: operation.to_string(),
            metadata,
        };
        let body = serde_json::to_vec(&req).map_err(|e| ProbeError::Decode(e.to_string()))?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        let raw = self
            .send("POST", self.binding_url(operation), headers, body)
            .await?;
        if !(200..300).contains(&raw.status) {
            return Err(ProbeError::Status(raw.status));
        }
        if let Some(code) = raw.headers.get(META_STATUS_CODE) {
            tracing::debug!("[PROBE] {} answered with status override {}", operation, code);
        }
        OpsResult::from_slice(&raw.body).map_err(|e| ProbeError::Decode(e.to_string()))
    }

    /// Like [`ProbeClient::request`] but turns negative answers into errors.
    pub async fn call(
        &self,
        operation: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<OpsResult> {
        let result = self.request(operation, metadata).await?;
        match result.event() {
            Some(OpsEvent::NotImplemented) => {
                Err(ProbeError::NotImplemented(result.message().to_string()))
            }
            Some(OpsEvent::Failed) => Err(ProbeError::Failed(result.message().to_string())),
            Some(OpsEvent::Invalid) => Err(ProbeError::Invalid(result.message().to_string())),
            _ => Ok(result),
        }
    }

    async fn send(
        &self,
        method: &'static str,
        url: String,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> Result<RawResponse> {
        let key = request_key(method, &url, &headers, &body);
        if let Some(hit) = self.cache.take(&key, self.config.cache_ttl) {
            tracing::debug!("[PROBE] serving late response for {} from cache", url);
            return Ok(hit);
        }

        let (tx, rx) = oneshot::channel();
        let http_client = self.http_client.clone();
        let cache = Arc::clone(&self.cache);
        let ttl = self.config.cache_ttl;
        let request_timeout = self.config.request_timeout;
        let task_url = url.clone();

        tokio::spawn(async move {
            let outcome =
                execute(&http_client, method, &task_url, &headers, body, request_timeout).await;
            // A closed channel means the caller stopped waiting.
            if let Err(unclaimed) = tx.send(outcome) {
                match unclaimed {
                    Ok(response) => {
                        tracing::debug!("[PROBE] caching late response for {}", task_url);
                        cache.insert(key, response, ttl);
                    }
                    Err(e) => {
                        tracing::warn!("[PROBE] background request to {} failed: {}", task_url, e);
                    }
                }
            }
        });

        match tokio::time::timeout(self.config.reconcile_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ProbeError::Transport("request task ended without a result".into())),
            Err(_) => {
                tracing::debug!(
                    "[PROBE] {} exceeded {:?}, leaving it to finish in background",
                    url,
                    self.config.reconcile_timeout
                );
                Err(ProbeError::Timeout(url))
            }
        }
    }

    // ── typed helpers ───────────────────────────────────────────────────

    pub async fn get_role(&self) -> Result<String> {
        let result = self.call(ops::GET_ROLE, BTreeMap::new()).await?;
        Ok(result.get_str("role").unwrap_or_default().to_string())
    }

    pub async fn check_role(&self) -> Result<OpsResult> {
        self.call(ops::CHECK_ROLE, BTreeMap::new()).await
    }

    pub async fn check_running(&self) -> Result<()> {
        self.call(ops::CHECK_RUNNING, BTreeMap::new()).await.map(|_| ())
    }

    pub async fn join_member(&self) -> Result<()> {
        self.call(ops::JOIN_MEMBER, BTreeMap::new()).await.map(|_| ())
    }

    pub async fn leave_member(&self) -> Result<()> {
        self.call(ops::LEAVE_MEMBER, BTreeMap::new()).await.map(|_| ())
    }

    pub async fn switchover(&self, leader: &str, candidate: &str) -> Result<()> {
        let mut meta = BTreeMap::new();
        meta.insert("leader".to_string(), leader.to_string());
        meta.insert("candidate".to_string(), candidate.to_string());
        self.call(ops::SWITCHOVER, meta).await.map(|_| ())
    }

    pub async fn lock(&self, reason: &str) -> Result<()> {
        let mut meta = BTreeMap::new();
        meta.insert("reason".to_string(), reason.to_string());
        self.call(ops::LOCK_INSTANCE, meta).await.map(|_| ())
    }

    pub async fn unlock(&self) -> Result<()> {
        self.call(ops::UNLOCK_INSTANCE, BTreeMap::new()).await.map(|_| ())
    }

    pub async fn volume_protection(&self) -> Result<OpsResult> {
        self.call(ops::VOLUME_PROTECTION, BTreeMap::new()).await
    }
}

async fn execute(
    http_client: &reqwest::Client,
    method: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: Vec<u8>,
    timeout: Duration,
) -> Result<RawResponse> {
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|e| ProbeError::Transport(e.to_string()))?;
    let mut builder = http_client.request(method, url).body(body).timeout(timeout);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    let body = response.bytes().await?.to_vec();
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}
