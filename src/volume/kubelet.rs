use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::{Result, WardenError};
use crate::events::{service_account_client, SERVICE_ACCOUNT_DIR};

/// Source of the node stats summary document.
#[async_trait]
pub trait VolumeStatsRequester: Send + Sync {
    async fn request(&self) -> Result<Vec<u8>>;
}

// The subset of the kubelet stats summary the watermark engine reads.

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Summary {
    #[serde(default)]
    pub pods: Vec<PodStats>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PodStats {
    #[serde(rename = "podRef")]
    pub pod_ref: PodRef,
    #[serde(default, rename = "volume")]
    pub volume_stats: Vec<RawVolumeStats>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PodRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVolumeStats {
    pub name: String,
    #[serde(default, rename = "capacityBytes")]
    pub capacity_bytes: Option<u64>,
    #[serde(default, rename = "usedBytes")]
    pub used_bytes: Option<u64>,
}

/// `GET https://{hostIP}:{port}/stats/summary` with the service-account
/// credentials.
pub struct KubeletStatsRequester {
    http_client: reqwest::Client,
    url: String,
    token: String,
}

impl KubeletStatsRequester {
    pub fn new(http_client: reqwest::Client, url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http_client,
            url: url.into(),
            token: token.into(),
        }
    }

    pub fn in_cluster(config: &AgentConfig) -> Result<Self> {
        if config.host_ip.is_empty() {
            return Err(WardenError::Config(
                "WARDEN_HOST_IP is required for volume protection".into(),
            ));
        }
        let sa_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(sa_dir.join("token"))?;
        let http_client = service_account_client(sa_dir, Duration::from_secs(10))?;
        Ok(Self::new(
            http_client,
            summary_url(&config.host_ip, config.kubelet_port),
            token.trim(),
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub fn summary_url(host_ip: &str, port: u16) -> String {
    format!("https://{}:{}/stats/summary", host_ip, port)
}

#[async_trait]
impl VolumeStatsRequester for KubeletStatsRequester {
    async fn request(&self) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(&self.url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(WardenError::Http(format!(
                "kubelet returned {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
