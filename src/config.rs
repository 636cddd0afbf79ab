use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, WardenError};

pub const MIN_FAILED_EVENT_REPORT_FREQUENCY: u64 = 300;
pub const MAX_FAILED_EVENT_REPORT_FREQUENCY: u64 = 3600;
pub const DEFAULT_ROLE_PROBE_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_KUBELET_PORT: u16 = 10250;

/// Process-wide agent settings, read once at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub engine: String,
    pub workload: String,
    pub pod_name: String,
    pub namespace: String,
    pub node_name: String,
    pub host_ip: String,
    pub db_address: String,
    pub db_port: u16,
    /// Allowed role names (lowercase) mapped to their access mode. Empty
    /// means every role reported by the engine is accepted.
    pub service_roles: BTreeMap<String, String>,
    pub failed_event_report_frequency: u64,
    pub role_probe_timeout_secs: u64,
    pub volume_protection_spec: Option<String>,
    /// Zero disables the background volume-protection loop.
    pub volume_protection_interval_secs: u64,
    pub kubelet_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            engine: String::new(),
            workload: "replication".to_string(),
            pod_name: String::new(),
            namespace: "default".to_string(),
            node_name: String::new(),
            host_ip: String::new(),
            db_address: "127.0.0.1".to_string(),
            db_port: 0,
            service_roles: BTreeMap::new(),
            failed_event_report_frequency: MAX_FAILED_EVENT_REPORT_FREQUENCY,
            role_probe_timeout_secs: DEFAULT_ROLE_PROBE_TIMEOUT_SECS,
            volume_protection_spec: None,
            volume_protection_interval_secs: 0,
            kubelet_port: DEFAULT_KUBELET_PORT,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset and empty values fall
    /// back to defaults; malformed numbers are configuration errors.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let pod_name = get("WARDEN_POD_NAME").unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_default()
        });

        let service_roles = match get("WARDEN_SERVICE_ROLES") {
            Some(raw) => parse_service_roles(&raw)?,
            None => BTreeMap::new(),
        };

        let failed_event_report_frequency = clamp_report_frequency(parse_or(
            get("WARDEN_FAILED_EVENT_REPORT_FREQUENCY"),
            "WARDEN_FAILED_EVENT_REPORT_FREQUENCY",
            defaults.failed_event_report_frequency,
        )?);

        Ok(Self {
            engine: get("WARDEN_ENGINE").unwrap_or(defaults.engine),
            workload: get("WARDEN_WORKLOAD").unwrap_or(defaults.workload),
            pod_name,
            namespace: get("WARDEN_NAMESPACE").unwrap_or(defaults.namespace),
            node_name: get("WARDEN_NODE_NAME").unwrap_or(defaults.node_name),
            host_ip: get("WARDEN_HOST_IP").unwrap_or(defaults.host_ip),
            db_address: get("WARDEN_DB_ADDRESS").unwrap_or(defaults.db_address),
            db_port: parse_or(get("WARDEN_DB_PORT"), "WARDEN_DB_PORT", defaults.db_port)?,
            service_roles,
            failed_event_report_frequency,
            role_probe_timeout_secs: parse_or(
                get("WARDEN_ROLE_PROBE_TIMEOUT_SECS"),
                "WARDEN_ROLE_PROBE_TIMEOUT_SECS",
                defaults.role_probe_timeout_secs,
            )?,
            volume_protection_spec: get("WARDEN_VOLUME_PROTECTION_SPEC"),
            volume_protection_interval_secs: parse_or(
                get("WARDEN_VOLUME_PROTECTION_INTERVAL_SECS"),
                "WARDEN_VOLUME_PROTECTION_INTERVAL_SECS",
                defaults.volume_protection_interval_secs,
            )?,
            kubelet_port: parse_or(
                get("WARDEN_KUBELET_PORT"),
                "WARDEN_KUBELET_PORT",
                defaults.kubelet_port,
            )?,
        })
    }

    /// Checks a reported role against the allowlist, case-insensitively.
    pub fn is_role_allowed(&self, role: &str) -> bool {
        self.service_roles.is_empty() || self.service_roles.contains_key(&role.to_lowercase())
    }

    pub fn allowed_roles(&self) -> Vec<String> {
        self.service_roles.keys().cloned().collect()
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| WardenError::Config(format!("{} is not a valid number: {:?}", key, v))),
        None => Ok(default),
    }
}

pub fn clamp_report_frequency(freq: u64) -> u64 {
    freq.clamp(
        MIN_FAILED_EVENT_REPORT_FREQUENCY,
        MAX_FAILED_EVENT_REPORT_FREQUENCY,
    )
}

/// Accepts either `{"primary":"ReadWrite","secondary":"Readonly"}` or
/// `["primary","secondary"]`.
fn parse_service_roles(raw: &str) -> Result<BTreeMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| WardenError::Config(format!("WARDEN_SERVICE_ROLES: {}", e)))?;
    match value {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(role, mode)| {
                let mode = mode.as_str().unwrap_or_default().to_string();
                (role.to_lowercase(), mode)
            })
            .collect()),
        serde_json::Value::Array(roles) => Ok(roles
            .iter()
            .filter_map(|r| r.as_str())
            .map(|r| (r.to_lowercase(), String::new()))
            .collect()),
        other => Err(WardenError::Config(format!(
            "WARDEN_SERVICE_ROLES must be an object or array, got {}",
            other
        ))),
    }
}
