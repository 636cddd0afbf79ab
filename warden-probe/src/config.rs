use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_CHARACTER_TYPE: &str = "custom";

/// Timeouts and cache policy for one probe client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// How long the caller waits for an answer.
    pub reconcile_timeout: Duration,
    /// How long the underlying HTTP call may run in the background.
    pub request_timeout: Duration,
    /// Lifetime of a response that arrived after the caller gave up.
    pub cache_ttl: Duration,
    /// Path segment of `/v1.0/bindings/{characterType}`.
    pub character_type: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            character_type: DEFAULT_CHARACTER_TYPE.to_string(),
        }
    }
}

impl ClientConfig {
    /// Reads `WARDEN_PROBE_RECONCILE_TIMEOUT_MS`, `WARDEN_PROBE_REQUEST_TIMEOUT_SECS`,
    /// `WARDEN_PROBE_CACHE_TTL_SECS` and `WARDEN_ENGINE`. Unparseable values
    /// keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            reconcile_timeout: millis("WARDEN_PROBE_RECONCILE_TIMEOUT_MS", defaults.reconcile_timeout),
            request_timeout: secs("WARDEN_PROBE_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            cache_ttl: secs("WARDEN_PROBE_CACHE_TTL_SECS", defaults.cache_ttl),
            character_type: std::env::var("WARDEN_ENGINE")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.character_type),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub member_name: String,
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub addr: String, // e.g., "http://pg-1.pg-headless:3501"
}

impl FleetConfig {
    /// Load peers from {data_dir}/peers.json or fall back to `WARDEN_PEERS`.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let peers_json = data_dir.join("peers.json");

        if peers_json.exists() {
            match std::fs::read_to_string(&peers_json) {
                Ok(content) => match serde_json::from_str::<FleetConfig>(&content) {
                    Ok(config) => {
                        tracing::info!(
                            "[PROBE] Loaded fleet config: member={}, peers={}",
                            config.member_name,
                            config.peers.len()
                        );
                        return config;
                    }
                    Err(e) => {
                        tracing::error!("[PROBE] Failed to parse peers.json: {}, using env", e);
                    }
                },
                Err(e) => {
                    tracing::error!("[PROBE] Failed to read peers.json: {}, using env", e);
                }
            }
        }

        let member_name = std::env::var("WARDEN_POD_NAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        });

        // WARDEN_PEERS: comma-separated "name=url" pairs.
        // Example: "pg-1=http://pg-1.pg-headless:3501,pg-2=http://pg-2.pg-headless:3501"
        let peers = std::env::var("WARDEN_PEERS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|entry| {
                let (name, addr) = entry.split_once('=')?;
                let (name, addr) = (name.trim(), addr.trim());
                if name.is_empty() || addr.is_empty() || name == member_name {
                    return None;
                }
                Some(PeerConfig {
                    name: name.to_string(),
                    addr: addr.trim_end_matches('/').to_string(),
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "[PROBE] {} peer(s) from WARDEN_PEERS: member={}",
            peers.len(),
            member_name
        );
        FleetConfig { member_name, peers }
    }
}
