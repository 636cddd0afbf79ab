//! Engine-agnostic database manager contract.
//!
//! Everything above this module (dispatch, volume protection, the HTTP
//! surface) is written against [`DbManager`]. Concrete engines embed a
//! [`DbManagerBase`] and override what their database can actually do; the
//! default method bodies encode the behavior shared by every replication
//! topology.

pub mod base;
pub mod registry;
pub mod role;

use async_trait::async_trait;

use crate::dcs::{Cluster, DbState, Member};
use crate::error::{Result, WardenError};

pub use base::DbManagerBase;
pub use registry::{ManagerFactory, ManagerRegistry};
pub use role::{HaState, Role, RoleMachine};

#[async_trait]
pub trait DbManager: Send + Sync {
    fn base(&self) -> &DbManagerBase;

    fn current_member_name(&self) -> &str {
        self.base().member_name()
    }

    fn engine(&self) -> &str {
        self.base().engine()
    }

    // ── liveness ────────────────────────────────────────────────────────

    async fn is_running(&self) -> bool;

    /// Engine-specific readiness check behind [`DbManager::is_db_startup_ready`].
    async fn probe_startup(&self) -> bool {
        self.is_running().await
    }

    /// Sticky: once the database has reported ready it is never re-checked.
    async fn is_db_startup_ready(&self) -> bool {
        if self.base().is_startup_ready() {
            return true;
        }
        if self.probe_startup().await {
            tracing::info!("[ENGINE] {} startup ready", self.engine());
            self.base().mark_startup_ready();
            return true;
        }
        false
    }

    // ── bootstrap ───────────────────────────────────────────────────────

    async fn initialize_cluster(&self, _cluster: &Cluster) -> Result<()> {
        Ok(())
    }

    async fn is_cluster_initialized(&self, _cluster: &Cluster) -> Result<bool> {
        Ok(true)
    }

    async fn is_current_member_in_cluster(&self, cluster: &Cluster) -> bool {
        cluster.member(self.current_member_name()).is_some()
    }

    async fn is_first_member(&self) -> bool {
        crate::dcs::ordinal_from_name(self.current_member_name()) == Some(0)
    }

    // ── health ──────────────────────────────────────────────────────────

    /// Replication topologies have no cluster-wide health beyond the leader's.
    async fn is_cluster_healthy(&self, _cluster: &Cluster) -> bool {
        true
    }

    async fn is_member_healthy(&self, cluster: &Cluster, member: &Member) -> bool;

    async fn is_current_member_healthy(&self, cluster: &Cluster) -> bool {
        match cluster.member(self.current_member_name()) {
            Some(member) => self.is_member_healthy(cluster, member).await,
            None => false,
        }
    }

    /// Replication position of `member`. Adapters usually query the member
    /// directly; the default trusts the snapshot carried in the cluster.
    async fn member_op_timestamp(&self, _cluster: &Cluster, member: &Member) -> Result<i64> {
        member
            .db_state
            .as_ref()
            .map(|s| s.op_timestamp)
            .ok_or_else(|| WardenError::Engine(format!("no db state for {}", member.name)))
    }

    /// Returns `(lagging, lag)`. Without a leader snapshot from this cycle
    /// there is nothing to compare against, so nobody is lagging.
    async fn is_member_lagging(&self, cluster: &Cluster, member: &Member) -> (bool, i64) {
        let leader = match cluster.leader.as_ref() {
            Some(l) => l,
            None => return (false, 0),
        };
        let leader_state = match leader.db_state.as_ref() {
            Some(s) => s,
            None => return (false, 0),
        };
        if leader.name == member.name {
            return (false, 0);
        }

        let max_lag = cluster.ha_config.max_lag_on_switchover;
        match self.member_op_timestamp(cluster, member).await {
            Ok(ts) => {
                let lag = leader_state.op_timestamp - ts;
                (lag > max_lag, lag)
            }
            Err(e) => {
                tracing::warn!("[ENGINE] cannot read position of {}: {}", member.name, e);
                (true, max_lag + 1)
            }
        }
    }

    // ── state snapshot ──────────────────────────────────────────────────

    /// Collects this member's state for the current HA cycle. Implementations
    /// reset the per-cycle cache first and store the fresh snapshot.
    async fn get_db_state(&self, _cluster: &Cluster) -> Result<DbState> {
        self.base().reset_db_state();
        Err(WardenError::NotImplemented("getDBState".into()))
    }

    // ── leadership ──────────────────────────────────────────────────────

    /// Only consensus topologies can observe a second leader.
    async fn has_other_healthy_leader(&self, _cluster: &Cluster) -> Option<Member> {
        None
    }

    async fn has_other_healthy_members(&self, cluster: &Cluster, leader: &str) -> Vec<Member> {
        let mut healthy = Vec::new();
        for member in cluster.members.iter().filter(|m| m.name != leader) {
            if self.is_member_healthy(cluster, member).await {
                healthy.push(member.clone());
            }
        }
        healthy
    }

    async fn is_leader(&self, cluster: &Cluster) -> Result<bool>;

    async fn is_leader_member(&self, cluster: &Cluster, member: &Member) -> Result<bool> {
        Ok(cluster
            .leader
            .as_ref()
            .map(|l| l.name == member.name)
            .unwrap_or(false))
    }

    // ── membership ──────────────────────────────────────────────────────

    async fn join_current_member_to_cluster(&self, _cluster: &Cluster) -> Result<()> {
        Ok(())
    }

    async fn leave_member_from_cluster(&self, _cluster: &Cluster, _member_name: &str) -> Result<()> {
        Ok(())
    }

    // ── role transitions ────────────────────────────────────────────────

    async fn promote(&self, _cluster: &Cluster) -> Result<()> {
        Err(WardenError::NotSupported("promote".into()))
    }

    async fn demote(&self) -> Result<()> {
        Err(WardenError::NotSupported("demote".into()))
    }

    async fn follow(&self, _cluster: &Cluster) -> Result<()> {
        Err(WardenError::NotSupported("follow".into()))
    }

    async fn recover(&self) -> Result<()> {
        Ok(())
    }

    async fn is_promoted(&self) -> bool {
        true
    }

    async fn get_replica_role(&self, _cluster: &Cluster) -> Result<String> {
        Err(WardenError::NotImplemented("getRole".into()))
    }

    // ── process control ─────────────────────────────────────────────────

    async fn start(&self) -> Result<()> {
        Err(WardenError::NotSupported("start".into()))
    }

    async fn stop(&self) -> Result<()> {
        Err(WardenError::NotSupported("stop".into()))
    }

    // ── accounts ────────────────────────────────────────────────────────

    async fn is_root_created(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create_root(&self) -> Result<()> {
        Ok(())
    }

    // ── disk protection ─────────────────────────────────────────────────

    async fn lock(&self, _reason: &str) -> Result<()> {
        Err(WardenError::NotSupported("lock".into()))
    }

    async fn unlock(&self) -> Result<()> {
        Err(WardenError::NotSupported("unlock".into()))
    }
}
