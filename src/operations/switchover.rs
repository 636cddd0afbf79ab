use async_trait::async_trait;

use super::{Operation, OperationContext};
use crate::error::Result;
use crate::probe::{OpsResult, ProbeRequest, ProbeResponse};

/// Validates a planned leadership transfer and records it in the DCS. The
/// HA loop performs the actual move.
pub struct Switchover;

#[async_trait]
impl Operation for Switchover {
    async fn invoke(
        &self,
        ctx: &OperationContext,
        req: &ProbeRequest,
        _resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let leader = req.meta("leader").unwrap_or_default();
        let candidate = req.meta("candidate").unwrap_or_default();
        if leader.is_empty() && candidate.is_empty() {
            return Ok(OpsResult::failed("Leader or Candidate must be set"));
        }

        let dcs = match &ctx.dcs {
            Some(d) => d.clone(),
            None => return Ok(OpsResult::failed("DCS store is not configured")),
        };
        let cluster = match dcs.get_cluster().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("[DISPATCH] get cluster failed: {}", e);
                return Ok(OpsResult::failed(format!("get cluster failed: {}", e)));
            }
        };
        let manager = match &ctx.manager {
            Some(m) => m.clone(),
            None => {
                return Ok(OpsResult::failed(format!(
                    "no database manager registered for {}",
                    ctx.engine()
                )))
            }
        };

        if !leader.is_empty() {
            let member = match cluster.member(leader) {
                Some(m) => m,
                None => {
                    return Ok(OpsResult::failed(format!(
                        "{} not exists in cluster",
                        leader
                    )))
                }
            };
            match manager.is_leader_member(&cluster, member).await {
                Ok(true) => {}
                Ok(false) => {
                    return Ok(OpsResult::failed(format!("{} is not the leader", leader)))
                }
                Err(e) => {
                    return Ok(OpsResult::failed(format!(
                        "check leader {} failed: {}",
                        leader, e
                    )))
                }
            }
        }

        if !candidate.is_empty() {
            let member = match cluster.member(candidate) {
                Some(m) => m,
                None => {
                    return Ok(OpsResult::failed(format!(
                        "candidate {} not exists",
                        candidate
                    )))
                }
            };
            if !manager.is_member_healthy(&cluster, member).await {
                return Ok(OpsResult::failed(format!(
                    "candidate {} is unhealthy",
                    candidate
                )));
            }
        } else if manager
            .has_other_healthy_members(&cluster, leader)
            .await
            .is_empty()
        {
            return Ok(OpsResult::failed(
                "candidate is not set and has no other healthy members",
            ));
        }

        if let Err(e) = dcs.create_switchover(leader, candidate).await {
            tracing::error!("[DISPATCH] create switchover failed: {}", e);
            return Ok(OpsResult::failed(format!("create switchover failed: {}", e)));
        }

        tracing::info!(
            "[DISPATCH] switchover recorded: leader={:?} candidate={:?}",
            leader,
            candidate
        );
        Ok(OpsResult::success("switchover recorded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::dcs::{Cluster, Dcs, Leader, Member};
    use crate::engine::DbManager;
    use crate::probe::{ops, OpsEvent};
    use crate::testing::{CountingDcs, FakeManager};
    use std::sync::Arc;

    fn cluster() -> Cluster {
        Cluster {
            cluster_name: "pg".into(),
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

    fn setup() -> (Arc<FakeManager>, Arc<CountingDcs>, OperationContext) {
        let mgr = Arc::new(FakeManager::new("pg-1"));
        let dcs = Arc::new(CountingDcs::new(cluster()));
        let ctx = OperationContext::new(AgentConfig::default())
            .with_manager(Some(mgr.clone() as Arc<dyn DbManager>))
            .with_dcs(Some(dcs.clone() as Arc<dyn Dcs>));
        (mgr, dcs, ctx)
    }

    async fn run(ctx: &OperationContext, leader: &str, candidate: &str) -> OpsResult {
        let req = ProbeRequest::new(ops::SWITCHOVER)
            .with_meta("leader", leader)
            .with_meta("candidate", candidate);
        Switchover
            .invoke(ctx, &req, &mut ProbeResponse::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn requires_leader_or_candidate() {
        let (_, dcs, ctx) = setup();
        let res = run(&ctx, "", "").await;
        assert_eq!(res.event(), Some(OpsEvent::Failed));
        assert_eq!(res.message(), "Leader or Candidate must be set");
        assert_eq!(dcs.writes("create_switchover"), 0);
    }

    #[tokio::test]
    async fn records_intent_for_valid_request() {
        let (_, dcs, ctx) = setup();
        let res = run(&ctx, "pg-0", "pg-2").await;
        assert_eq!(res.event(), Some(OpsEvent::Success));
        assert_eq!(dcs.writes("create_switchover"), 1);

        let switchover = dcs.get_cluster().await.unwrap().switchover.unwrap();
        assert_eq!(switchover.leader, "pg-0");
        assert_eq!(switchover.candidate, "pg-2");
    }

    #[tokio::test]
    async fn rejects_non_leader() {
        let (_, dcs, ctx) = setup();
        let res = run(&ctx, "pg-1", "").await;
        assert_eq!(res.event(), Some(OpsEvent::Failed));
        assert!(res.message().contains("not the leader"));
        assert_eq!(dcs.writes("create_switchover"), 0);
    }

    #[tokio::test]
    async fn rejects_unknown_or_unhealthy_candidate() {
        let (mgr, _, ctx) = setup();
        let res = run(&ctx, "pg-0", "pg-9").await;
        assert!(res.message().contains("not exists"));

        mgr.set_unhealthy("pg-2");
        let res = run(&ctx, "pg-0", "pg-2").await;
        assert_eq!(res.event(), Some(OpsEvent::Failed));
        assert!(res.message().contains("unhealthy"));
    }

    #[tokio::test]
    async fn without_candidate_needs_another_healthy_member() {
        let (mgr, dcs, ctx) = setup();
        mgr.set_unhealthy("pg-1");
        mgr.set_unhealthy("pg-2");
        let res = run(&ctx, "pg-0", "").await;
        assert_eq!(
            res.message(),
            "candidate is not set and has no other healthy members"
        );
        assert_eq!(dcs.writes("create_switchover"), 0);
    }

    #[tokio::test]
    async fn dcs_write_failure_is_failed() {
        let (_, dcs, ctx) = setup();
        dcs.fail_writes(true);
        let res = run(&ctx, "pg-0", "").await;
        assert_eq!(res.event(), Some(OpsEvent::Failed));
        assert!(res.message().contains("create switchover failed"));
    }

    #[tokio::test]
    async fn no_dcs_is_failed() {
        let ctx = OperationContext::new(AgentConfig::default());
        let res = run(&ctx, "pg-0", "").await;
        assert_eq!(res.event(), Some(OpsEvent::Failed));
    }
}
