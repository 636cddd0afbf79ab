//! Cluster model as seen through the distributed configuration store.
//!
//! The agent never owns this state. Every operation fetches a fresh
//! [`Cluster`] via [`Dcs::get_cluster`] and throws it away afterwards; the
//! only writes it performs are switchover intents and HA config updates.

pub mod static_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

pub use static_store::StaticDcs;

/// Default replication lag tolerated before a member is excluded from
/// switchover candidacy (1 MiB of replication position).
pub const DEFAULT_MAX_LAG_ON_SWITCHOVER: i64 = 1_048_576;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbState {
    pub op_timestamp: i64,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub db_port: u16,
    #[serde(default)]
    pub probe_port: u16,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_state: Option<DbState>,
}

impl Member {
    pub fn new(name: impl Into<String>, host: impl Into<String>, db_port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            db_port,
            ..Default::default()
        }
    }

    pub fn ordinal(&self) -> Option<u32> {
        ordinal_from_name(&self.name)
    }
}

/// Ordinal parsed from the trailing `-N` of a stateful-set style name.
pub fn ordinal_from_name(name: &str) -> Option<u32> {
    name.rsplit_once('-')?.1.parse().ok()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leader {
    pub name: String,
    #[serde(default)]
    pub acquire_time: i64,
    #[serde(default)]
    pub renew_time: i64,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_state: Option<DbState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberToDelete {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub is_finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default = "default_max_lag")]
    pub max_lag_on_switchover: i64,
    #[serde(default)]
    pub delete_members: BTreeMap<String, MemberToDelete>,
}

fn default_true() -> bool {
    true
}

fn default_max_lag() -> i64 {
    DEFAULT_MAX_LAG_ON_SWITCHOVER
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: 0,
            max_lag_on_switchover: DEFAULT_MAX_LAG_ON_SWITCHOVER,
            delete_members: BTreeMap::new(),
        }
    }
}

impl HaConfig {
    pub fn is_deleting(&self, member: &str) -> bool {
        self.delete_members
            .get(member)
            .map(|m| !m.is_finished)
            .unwrap_or(false)
    }

    pub fn is_deleted(&self, member: &str) -> bool {
        self.delete_members
            .get(member)
            .map(|m| m.is_finished)
            .unwrap_or(false)
    }

    /// Marks a member as leaving. Returns false if it was already marked.
    pub fn add_member_to_delete(&mut self, member: &str) -> bool {
        if self.delete_members.contains_key(member) {
            return false;
        }
        self.delete_members.insert(
            member.to_string(),
            MemberToDelete {
                uid: member.to_string(),
                is_finished: false,
            },
        );
        true
    }

    pub fn finish_deleted(&mut self, member: &str) {
        if let Some(m) = self.delete_members.get_mut(member) {
            m.is_finished = true;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Switchover {
    #[serde(default)]
    pub leader: String,
    #[serde(default)]
    pub candidate: String,
    #[serde(default)]
    pub scheduled_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub cluster_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<Leader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switchover: Option<Switchover>,
    #[serde(default)]
    pub ha_config: HaConfig,
}

impl Cluster {
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn leader_member(&self) -> Option<&Member> {
        let leader = self.leader.as_ref()?;
        self.member(&leader.name)
    }

    pub fn is_locked(&self) -> bool {
        self.leader.as_ref().map(|l| !l.name.is_empty()).unwrap_or(false)
    }

    pub fn member_addr(&self, member: &Member) -> String {
        format!("{}:{}", member.host, member.db_port)
    }

    pub fn member_addrs(&self) -> Vec<String> {
        self.members.iter().map(|m| self.member_addr(m)).collect()
    }
}

/// Distributed configuration store consumed by dispatch and engine adapters.
#[async_trait]
pub trait Dcs: Send + Sync {
    fn cluster_name(&self) -> String;

    async fn get_cluster(&self) -> Result<Cluster>;

    /// Records the intent to move leadership. Performing it is the HA loop's job.
    async fn create_switchover(&self, leader: &str, candidate: &str) -> Result<()>;

    async fn update_ha_config(&self, ha_config: &HaConfig) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_members() -> Cluster {
        Cluster {
            cluster_name: "pg".into(),
            namespace: "default".into(),
            replicas: 3,
            members: vec![
                Member::new("pg-0", "10.0.0.1", 5432),
                Member::new("pg-1", "10.0.0.2", 5432),
                Member::new("pg-2", "10.0.0.3", 5432),
            ],
            leader: Some(Leader {
                name: "pg-0".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn leader_member_resolves_by_name() {
        let cluster = three_members();
        assert_eq!(cluster.leader_member().unwrap().host, "10.0.0.1");
        assert!(cluster.is_locked());
    }

    #[test]
    fn leader_member_missing_when_leader_not_listed() {
        let mut cluster = three_members();
        cluster.leader = Some(Leader {
            name: "pg-9".into(),
            ..Default::default()
        });
        assert!(cluster.leader_member().is_none());
    }

    #[test]
    fn member_addrs_use_db_port() {
        let cluster = three_members();
        assert_eq!(
            cluster.member_addrs(),
            vec!["10.0.0.1:5432", "10.0.0.2:5432", "10.0.0.3:5432"]
        );
    }

    #[test]
    fn ordinal_from_name_suffix() {
        assert_eq!(Member::new("mysql-2", "", 0).ordinal(), Some(2));
        assert_eq!(Member::new("standalone", "", 0).ordinal(), None);
    }

    #[test]
    fn ha_config_delete_lifecycle() {
        let mut ha = HaConfig::default();
        assert!(!ha.is_deleting("pg-2"));
        assert!(ha.add_member_to_delete("pg-2"));
        assert!(!ha.add_member_to_delete("pg-2"), "second mark is a no-op");
        assert!(ha.is_deleting("pg-2"));
        assert!(!ha.is_deleted("pg-2"));

        ha.finish_deleted("pg-2");
        assert!(!ha.is_deleting("pg-2"));
        assert!(ha.is_deleted("pg-2"));
    }

    #[test]
    fn ha_config_defaults_max_lag_from_json() {
        let ha: HaConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(ha.max_lag_on_switchover, DEFAULT_MAX_LAG_ON_SWITCHOVER);
        assert!(ha.enabled);
    }

    #[test]
    fn cluster_json_uses_camel_case() {
        let json = serde_json::to_value(three_members()).unwrap();
        assert_eq!(json["clusterName"], "pg");
        assert_eq!(json["members"][0]["dbPort"], 5432);
        assert_eq!(json["haConfig"]["maxLagOnSwitchover"], 1_048_576);
    }
}
