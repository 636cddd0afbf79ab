//! Dispatcher wired the way the probe server wires it: static DCS loaded
//! from a data dir, a replication manager, every built-in operation.

mod common;

use common::{count, ReplicaManager, THREE_MEMBER_CLUSTER};
use std::sync::Arc;
use tempfile::TempDir;
use warden::dcs::{Dcs, StaticDcs};
use warden::engine::DbManager;
use warden::probe::{ops, META_STATUS_CODE, NOT_FOUND_STATUS};
use warden::{AgentConfig, Dispatcher, OperationContext, OpsEvent, OpsResult, ProbeRequest};

struct Harness {
    _dir: TempDir,
    manager: Arc<ReplicaManager>,
    dcs: Arc<StaticDcs>,
    dispatcher: Dispatcher,
}

fn harness(member: &str, role: &str) -> Harness {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cluster.json"), THREE_MEMBER_CLUSTER).unwrap();
    let dcs = Arc::new(StaticDcs::load_or_default(dir.path()));
    let manager = ReplicaManager::new(member, role);

    let config = AgentConfig {
        engine: "postgresql".into(),
        pod_name: member.into(),
        ..Default::default()
    };
    let ctx = OperationContext::new(config)
        .with_manager(Some(manager.clone() as Arc<dyn DbManager>))
        .with_dcs(Some(dcs.clone() as Arc<dyn Dcs>));

    Harness {
        _dir: dir,
        manager,
        dcs,
        dispatcher: Dispatcher::with_builtin(ctx, None),
    }
}

async fn call(h: &Harness, req: ProbeRequest) -> OpsResult {
    h.dispatcher.invoke(Some(req)).await.unwrap().result().unwrap()
}

#[tokio::test]
async fn cluster_json_is_loaded_from_data_dir() {
    let h = harness("pg-1", "secondary");
    let cluster = h.dcs.get_cluster().await.unwrap();
    assert_eq!(cluster.cluster_name, "pg");
    assert_eq!(cluster.members.len(), 3);
    assert_eq!(cluster.leader.unwrap().name, "pg-0");
}

#[tokio::test]
async fn check_role_reports_role_and_class() {
    let h = harness("pg-0", "Primary");
    let res = call(&h, ProbeRequest::new(ops::CHECK_ROLE)).await;
    assert_eq!(res.event(), Some(OpsEvent::Success));
    assert_eq!(res.get_str("role"), Some("Primary"));
    assert_eq!(res.get_str("roleClass"), Some("PRIMARY"));

    *h.manager.role.lock().unwrap() = "secondary".into();
    let res = call(&h, ProbeRequest::new(ops::CHECK_ROLE)).await;
    assert_eq!(res.get_str("originalRole"), Some("Primary"));
    assert_eq!(res.get_str("roleClass"), Some("SECONDARY"));
}

#[tokio::test]
async fn switchover_records_intent_in_dcs() {
    let h = harness("pg-1", "secondary");
    let req = ProbeRequest::new(ops::SWITCHOVER)
        .with_meta("leader", "pg-0")
        .with_meta("candidate", "pg-2");

    let res = call(&h, req).await;
    assert_eq!(res.event(), Some(OpsEvent::Success), "{}", res.message());

    let switchover = h.dcs.get_cluster().await.unwrap().switchover.unwrap();
    assert_eq!(switchover.leader, "pg-0");
    assert_eq!(switchover.candidate, "pg-2");
}

#[tokio::test]
async fn switchover_from_non_leader_is_rejected() {
    let h = harness("pg-1", "secondary");
    let req = ProbeRequest::new(ops::SWITCHOVER).with_meta("leader", "pg-2");

    let res = call(&h, req).await;
    assert_eq!(res.event(), Some(OpsEvent::Failed));
    assert!(h.dcs.get_cluster().await.unwrap().switchover.is_none());
}

#[tokio::test]
async fn join_and_leave_are_idempotent() {
    let h = harness("pg-2", "secondary");

    for _ in 0..2 {
        let res = call(&h, ProbeRequest::new(ops::JOIN_MEMBER)).await;
        assert_eq!(res.event(), Some(OpsEvent::Success));
    }
    for _ in 0..2 {
        let res = call(&h, ProbeRequest::new(ops::LEAVE_MEMBER)).await;
        assert_eq!(res.event(), Some(OpsEvent::Success));
    }

    assert_eq!(count(&h.manager.joins), 2);
    assert_eq!(count(&h.manager.leaves), 2);
    let ha = h.dcs.get_cluster().await.unwrap().ha_config;
    assert!(ha.is_deleting("pg-2"));
    assert_eq!(ha.delete_members.len(), 1);
}

#[tokio::test]
async fn lock_and_unlock_reach_the_manager() {
    let h = harness("pg-0", "primary");
    let res = call(
        &h,
        ProbeRequest::new(ops::LOCK_INSTANCE).with_meta("reason", "maintenance"),
    )
    .await;
    assert_eq!(res.event(), Some(OpsEvent::Success));
    call(&h, ProbeRequest::new(ops::UNLOCK_INSTANCE)).await;

    assert_eq!(count(&h.manager.locks), 1);
    assert_eq!(count(&h.manager.unlocks), 1);
    assert_eq!(h.manager.lock_reasons.lock().unwrap()[0], "maintenance");
}

#[tokio::test]
async fn unknown_operation_never_reaches_the_manager() {
    let h = harness("pg-0", "primary");
    let resp = h
        .dispatcher
        .invoke(Some(ProbeRequest::new("rebuildReplica")))
        .await
        .unwrap();

    assert_eq!(
        resp.metadata.get(META_STATUS_CODE).map(String::as_str),
        Some(NOT_FOUND_STATUS)
    );
    let res = resp.result().unwrap();
    assert_eq!(res.event(), Some(OpsEvent::NotImplemented));
    assert_eq!(count(&h.manager.joins) + count(&h.manager.locks), 0);
}

#[tokio::test]
async fn disabled_volume_protection_is_failed() {
    let h = harness("pg-0", "primary");
    let res = call(&h, ProbeRequest::new(ops::VOLUME_PROTECTION)).await;
    assert_eq!(res.event(), Some(OpsEvent::Failed));
}
