//! Role normalization and the promote/demote/follow state machine.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::DbManager;
use crate::dcs::Cluster;
use crate::error::Result;

/// Coarse role class shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    /// Maps an engine-native role name onto a class. Unknown names and
    /// transient roles (e.g. a consensus candidate) have no class.
    pub fn normalize(native: &str) -> Option<Role> {
        match native.trim().to_ascii_lowercase().as_str() {
            "leader" | "primary" | "master" => Some(Role::Primary),
            "follower" | "secondary" | "slave" | "standby" | "replica" | "learner" => {
                Some(Role::Secondary)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "PRIMARY",
            Role::Secondary => "SECONDARY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaState {
    Unknown,
    Follower,
    Leader,
    Demoting,
    Promoting,
}

struct Inner {
    state: HaState,
    following: Option<String>,
}

/// Drives a [`DbManager`] through role transitions. Each transition is
/// idempotent: asking for the state the member is already in does not touch
/// the database.
pub struct RoleMachine {
    manager: Arc<dyn DbManager>,
    inner: Mutex<Inner>,
}

impl RoleMachine {
    pub fn new(manager: Arc<dyn DbManager>) -> Self {
        Self {
            manager,
            inner: Mutex::new(Inner {
                state: HaState::Unknown,
                following: None,
            }),
        }
    }

    pub async fn state(&self) -> HaState {
        self.inner.lock().await.state
    }

    pub async fn following(&self) -> Option<String> {
        self.inner.lock().await.following.clone()
    }

    pub async fn promote(&self, cluster: &Cluster) -> Result<HaState> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            HaState::Leader => return Ok(HaState::Leader),
            // A previous promote was issued; only wait for it to land.
            HaState::Promoting => {}
            previous => {
                inner.state = HaState::Promoting;
                if let Err(e) = self.manager.promote(cluster).await {
                    tracing::warn!("[ROLE] promote failed: {}", e);
                    inner.state = previous;
                    return Err(e);
                }
            }
        }
        if self.manager.is_promoted().await {
            inner.state = HaState::Leader;
            inner.following = None;
        }
        Ok(inner.state)
    }

    pub async fn demote(&self) -> Result<HaState> {
        let mut inner = self.inner.lock().await;
        if inner.state == HaState::Follower {
            return Ok(HaState::Follower);
        }
        let previous = inner.state;
        inner.state = HaState::Demoting;
        if let Err(e) = self.manager.demote().await {
            tracing::warn!("[ROLE] demote failed: {}", e);
            inner.state = previous;
            return Err(e);
        }
        inner.state = HaState::Follower;
        Ok(inner.state)
    }

    /// Points replication at the cluster's leader unless already doing so.
    pub async fn follow(&self, cluster: &Cluster) -> Result<HaState> {
        let mut inner = self.inner.lock().await;
        let leader = match cluster.leader.as_ref().filter(|l| !l.name.is_empty()) {
            Some(l) => l.name.clone(),
            None => return Ok(inner.state),
        };
        if leader == self.manager.current_member_name() {
            return Ok(inner.state);
        }
        if inner.state == HaState::Follower && inner.following.as_deref() == Some(leader.as_str())
        {
            return Ok(inner.state);
        }
        self.manager.follow(cluster).await?;
        tracing::info!("[ROLE] now following {}", leader);
        inner.state = HaState::Follower;
        inner.following = Some(leader);
        Ok(inner.state)
    }

    /// Brings a member back from an unknown state. Never assumes leadership.
    pub async fn recover(&self) -> Result<HaState> {
        let mut inner = self.inner.lock().await;
        self.manager.recover().await?;
        inner.state = HaState::Follower;
        inner.following = None;
        Ok(inner.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcs::{Leader, Member};
    use crate::testing::FakeManager;

    fn cluster_led_by(leader: &str) -> Cluster {
        Cluster {
            cluster_name: "db".into(),
            members: vec![Member::new("db-0", "h0", 1), Member::new("db-1", "h1", 1)],
            leader: Some(Leader {
                name: leader.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn normalize_native_role_names() {
        for native in ["leader", "Primary", "MASTER"] {
            assert_eq!(Role::normalize(native), Some(Role::Primary), "{native}");
        }
        for native in ["follower", "secondary", "Slave", "standby", "learner"] {
            assert_eq!(Role::normalize(native), Some(Role::Secondary), "{native}");
        }
        assert_eq!(Role::normalize("candidate"), None);
        assert_eq!(Role::normalize(""), None);
        assert_eq!(Role::Primary.as_str(), "PRIMARY");
    }

    #[tokio::test]
    async fn promote_twice_calls_manager_once() {
        let mgr = Arc::new(FakeManager::new("db-1"));
        let machine = RoleMachine::new(mgr.clone());
        let cluster = cluster_led_by("db-0");

        assert_eq!(machine.promote(&cluster).await.unwrap(), HaState::Leader);
        assert_eq!(machine.promote(&cluster).await.unwrap(), HaState::Leader);
        assert_eq!(mgr.calls("promote"), 1);
    }

    #[tokio::test]
    async fn promote_waits_until_promoted() {
        let mgr = Arc::new(FakeManager::new("db-1"));
        mgr.set_promoted(false);
        let machine = RoleMachine::new(mgr.clone());
        let cluster = cluster_led_by("db-0");

        assert_eq!(machine.promote(&cluster).await.unwrap(), HaState::Promoting);
        mgr.set_promoted(true);
        assert_eq!(machine.promote(&cluster).await.unwrap(), HaState::Leader);
        assert_eq!(mgr.calls("promote"), 1, "second call only re-checks");
    }

    #[tokio::test]
    async fn failed_promote_restores_previous_state() {
        let mgr = Arc::new(FakeManager::new("db-1"));
        mgr.fail("promote");
        let machine = RoleMachine::new(mgr.clone());

        assert!(machine.promote(&cluster_led_by("db-0")).await.is_err());
        assert_eq!(machine.state().await, HaState::Unknown);
    }

    #[tokio::test]
    async fn demote_twice_calls_manager_once() {
        let mgr = Arc::new(FakeManager::new("db-0"));
        let machine = RoleMachine::new(mgr.clone());

        machine.promote(&cluster_led_by("db-0")).await.unwrap();
        assert_eq!(machine.demote().await.unwrap(), HaState::Follower);
        assert_eq!(machine.demote().await.unwrap(), HaState::Follower);
        assert_eq!(mgr.calls("demote"), 1);
    }

    #[tokio::test]
    async fn follow_same_leader_does_not_reconfigure() {
        let mgr = Arc::new(FakeManager::new("db-1"));
        let machine = RoleMachine::new(mgr.clone());
        let cluster = cluster_led_by("db-0");

        machine.follow(&cluster).await.unwrap();
        machine.follow(&cluster).await.unwrap();
        assert_eq!(mgr.calls("follow"), 1);
        assert_eq!(machine.following().await.as_deref(), Some("db-0"));
    }

    #[tokio::test]
    async fn follow_new_leader_reconfigures() {
        let mgr = Arc::new(FakeManager::new("db-1"));
        let machine = RoleMachine::new(mgr.clone());

        machine.follow(&cluster_led_by("db-0")).await.unwrap();
        let mut moved = cluster_led_by("db-2");
        moved.members.push(Member::new("db-2", "h2", 1));
        machine.follow(&moved).await.unwrap();
        assert_eq!(mgr.calls("follow"), 2);
        assert_eq!(machine.following().await.as_deref(), Some("db-2"));
    }

    #[tokio::test]
    async fn follow_self_or_no_leader_is_noop() {
        let mgr = Arc::new(FakeManager::new("db-0"));
        let machine = RoleMachine::new(mgr.clone());

        machine.follow(&cluster_led_by("db-0")).await.unwrap();
        let mut leaderless = cluster_led_by("db-0");
        leaderless.leader = None;
        machine.follow(&leaderless).await.unwrap();

        assert_eq!(mgr.calls("follow"), 0);
        assert_eq!(machine.state().await, HaState::Unknown);
    }

    #[tokio::test]
    async fn recover_lands_in_follower() {
        let mgr = Arc::new(FakeManager::new("db-1"));
        let machine = RoleMachine::new(mgr.clone());
        assert_eq!(machine.recover().await.unwrap(), HaState::Follower);
        assert_eq!(mgr.calls("recover"), 1);
    }
}
