use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::client::ProbeClient;
use crate::config::{ClientConfig, FleetConfig};
use crate::error::{ProbeError, Result};

/// Trip after 3 consecutive transport failures, probe again after 30 seconds.
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(30);

struct Peer {
    name: String,
    client: ProbeClient,
    breaker: CircuitBreaker,
    last_success: AtomicU64, // Unix seconds
}

impl Peer {
    fn observe<T>(&self, outcome: &Result<T>) {
        match outcome {
            Err(e) if e.is_transport() => self.breaker.record_failure(),
            _ => {
                self.breaker.record_success();
                self.last_success.store(now_secs(), Ordering::Relaxed);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerRole {
    pub peer: String,
    pub role: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub peer: String,
    pub addr: String,
    /// None means the peer never answered.
    pub last_success_secs_ago: Option<u64>,
    /// "healthy" (<60s), "stale" (60-300s), "unhealthy" (>300s),
    /// "circuit_open", "never_contacted"
    pub status: String,
}

/// The other agents of this cluster, queried together.
pub struct Fleet {
    member_name: String,
    peers: Vec<Arc<Peer>>,
}

impl Fleet {
    pub fn new(config: FleetConfig, client_config: ClientConfig) -> Self {
        let peers = config
            .peers
            .into_iter()
            .map(|p| {
                Arc::new(Peer {
                    client: ProbeClient::new(p.addr, client_config.clone()),
                    name: p.name,
                    breaker: CircuitBreaker::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOL_DOWN),
                    last_success: AtomicU64::new(0),
                })
            })
            .collect();

        Self {
            member_name: config.member_name,
            peers,
        }
    }

    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn client(&self, peer: &str) -> Option<&ProbeClient> {
        self.peers.iter().find(|p| p.name == peer).map(|p| &p.client)
    }

    pub fn available_peers(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|p| p.breaker.allow_request())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Queries `getRole` on every peer concurrently. Peers with an open
    /// circuit are reported without being contacted.
    pub async fn roles(&self) -> Vec<PeerRole> {
        let handles: Vec<_> = self
            .peers
            .iter()
            .map(|peer| {
                let peer = Arc::clone(peer);
                tokio::spawn(async move {
                    if !peer.breaker.allow_request() {
                        tracing::debug!("[PROBE] skipping peer {} (circuit open)", peer.name);
                        return (peer.name.clone(), Err(ProbeError::Unavailable(peer.name.clone())));
                    }
                    let outcome = peer.client.get_role().await;
                    peer.observe(&outcome);
                    (peer.name.clone(), outcome)
                })
            })
            .collect();

        let mut roles = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((peer, Ok(role))) => roles.push(PeerRole {
                    peer,
                    role: Some(role),
                    error: None,
                }),
                Ok((peer, Err(e))) => {
                    tracing::warn!("[PROBE] getRole on {} failed: {}", peer, e);
                    roles.push(PeerRole {
                        peer,
                        role: None,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => tracing::error!("[PROBE] role query task panicked: {}", e),
            }
        }
        roles
    }

    /// First peer whose normalized role is primary.
    pub async fn find_leader(&self) -> Option<String> {
        self.roles().await.into_iter().find_map(|r| {
            let role = r.role?;
            match warden::engine::Role::normalize(&role) {
                Some(warden::engine::Role::Primary) => Some(r.peer),
                _ => None,
            }
        })
    }

    pub fn peer_statuses(&self) -> Vec<PeerStatus> {
        let now = now_secs();
        self.peers
            .iter()
            .map(|p| {
                let last = p.last_success.load(Ordering::Relaxed);
                let (ago, status) = if last == 0 {
                    (None, "never_contacted")
                } else {
                    let ago = now.saturating_sub(last);
                    let status = match p.breaker.state() {
                        CircuitState::Open => "circuit_open",
                        _ if ago < 60 => "healthy",
                        _ if ago < 300 => "stale",
                        _ => "unhealthy",
                    };
                    (Some(ago), status)
                };
                PeerStatus {
                    peer: p.name.clone(),
                    addr: p.client.base_url().to_string(),
                    last_success_secs_ago: ago,
                    status: status.to_string(),
                }
            })
            .collect()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
