use async_trait::async_trait;
use std::path::Path;
use tokio::sync::RwLock;

use super::{Cluster, Dcs, HaConfig, Leader, Member, Switchover};
use crate::error::Result;

/// In-process DCS backed by a fixed member list.
///
/// Used for standalone deployments and tests. Switchover intents and HA config
/// updates are kept in memory for the lifetime of the process.
pub struct StaticDcs {
    cluster: RwLock<Cluster>,
}

impl StaticDcs {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster: RwLock::new(cluster),
        }
    }

    /// Load the cluster from {data_dir}/cluster.json or fall back to env vars.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let cluster_json = data_dir.join("cluster.json");

        if cluster_json.exists() {
            match std::fs::read_to_string(&cluster_json) {
                Ok(content) => match serde_json::from_str::<Cluster>(&content) {
                    Ok(cluster) => {
                        tracing::info!(
                            "Loaded cluster config: cluster={}, members={}",
                            cluster.cluster_name,
                            cluster.members.len()
                        );
                        return Self::new(cluster);
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse cluster.json: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read cluster.json: {}, using defaults", e);
                }
            }
        }

        Self::new(cluster_from_env())
    }
}

fn cluster_from_env() -> Cluster {
    let cluster_name = std::env::var("WARDEN_CLUSTER_NAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "standalone".to_string())
    });
    let namespace = std::env::var("WARDEN_NAMESPACE").unwrap_or_else(|_| "default".to_string());

    // WARDEN_MEMBERS: comma-separated "name=host:port" pairs.
    // Example: "pg-0=10.0.0.1:5432,pg-1=10.0.0.2:5432"
    let members = std::env::var("WARDEN_MEMBERS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(parse_member)
        .collect::<Vec<_>>();

    let leader = std::env::var("WARDEN_LEADER")
        .ok()
        .filter(|l| !l.is_empty())
        .map(|name| Leader {
            name,
            ..Default::default()
        });

    if members.is_empty() {
        tracing::info!(
            "No cluster.json found, running standalone: cluster={}",
            cluster_name
        );
    } else {
        tracing::info!(
            "No cluster.json found, loaded {} member(s) from WARDEN_MEMBERS: cluster={}",
            members.len(),
            cluster_name
        );
    }

    Cluster {
        cluster_name,
        namespace,
        replicas: members.len() as u32,
        members,
        leader,
        ..Default::default()
    }
}

fn parse_member(entry: &str) -> Option<Member> {
    let (name, addr) = entry.split_once('=')?;
    let (host, port) = addr.trim().rsplit_once(':')?;
    let name = name.trim();
    if name.is_empty() || host.is_empty() {
        return None;
    }
    Some(Member::new(name, host, port.parse().ok()?))
}

#[async_trait]
impl Dcs for StaticDcs {
    fn cluster_name(&self) -> String {
        // try_read only fails while a writer holds the lock; writes are short.
        match self.cluster.try_read() {
            Ok(c) => c.cluster_name.clone(),
            Err(_) => String::new(),
        }
    }

    async fn get_cluster(&self) -> Result<Cluster> {
        Ok(self.cluster.read().await.clone())
    }

    async fn create_switchover(&self, leader: &str, candidate: &str) -> Result<()> {
        let mut cluster = self.cluster.write().await;
        tracing::info!(
            "[DCS] Switchover requested: leader={:?} candidate={:?}",
            leader,
            candidate
        );
        cluster.switchover = Some(Switchover {
            leader: leader.to_string(),
            candidate: candidate.to_string(),
            scheduled_at: chrono::Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn update_ha_config(&self, ha_config: &HaConfig) -> Result<()> {
        self.cluster.write().await.ha_config = ha_config.clone();
        Ok(())
    }
}
