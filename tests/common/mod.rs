use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use warden::dcs::{Cluster, Member};
use warden::engine::{DbManager, DbManagerBase};
use warden::volume::VolumeStatsRequester;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Replication-topology manager that tracks the calls dispatch and volume
/// protection make into it.
pub struct ReplicaManager {
    base: DbManagerBase,
    pub role: Mutex<String>,
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
    pub locks: AtomicUsize,
    pub unlocks: AtomicUsize,
    pub lock_reasons: Mutex<Vec<String>>,
}

impl ReplicaManager {
    pub fn new(member: &str, role: &str) -> Arc<Self> {
        Arc::new(Self {
            base: DbManagerBase::new("postgresql", member),
            role: Mutex::new(role.to_string()),
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
            locks: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
            lock_reasons: Mutex::new(Vec::new()),
        })
    }
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[async_trait]
impl DbManager for ReplicaManager {
    fn base(&self) -> &DbManagerBase {
        &self.base
    }

    async fn is_running(&self) -> bool {
        true
    }

    async fn is_member_healthy(&self, _cluster: &Cluster, _member: &Member) -> bool {
        true
    }

    async fn is_leader(&self, cluster: &Cluster) -> warden::Result<bool> {
        Ok(cluster
            .leader
            .as_ref()
            .is_some_and(|l| l.name == self.current_member_name()))
    }

    async fn join_current_member_to_cluster(&self, _cluster: &Cluster) -> warden::Result<()> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn leave_member_from_cluster(
        &self,
        _cluster: &Cluster,
        _member: &str,
    ) -> warden::Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_replica_role(&self, _cluster: &Cluster) -> warden::Result<String> {
        Ok(self.role.lock().unwrap().clone())
    }

    async fn lock(&self, reason: &str) -> warden::Result<()> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        self.lock_reasons.lock().unwrap().push(reason.to_string());
        Ok(())
    }

    async fn unlock(&self) -> warden::Result<()> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Kubelet stand-in reporting a single volume of one pod.
#[derive(Clone)]
pub struct KubeletStub {
    pod: String,
    volume: String,
    capacity: u64,
    used: Arc<Mutex<u64>>,
}

impl KubeletStub {
    #[allow(dead_code)]
    pub fn new(pod: &str, volume: &str, capacity: u64) -> Self {
        Self {
            pod: pod.into(),
            volume: volume.into(),
            capacity,
            used: Arc::new(Mutex::new(0)),
        }
    }

    #[allow(dead_code)]
    pub fn report(&self, used: u64) {
        *self.used.lock().unwrap() = used;
    }
}

#[async_trait]
impl VolumeStatsRequester for KubeletStub {
    async fn request(&self) -> warden::Result<Vec<u8>> {
        let body = serde_json::json!({
            "node": {"nodeName": "node-1"},
            "pods": [{
                "podRef": {"name": self.pod, "namespace": "default"},
                "volume": [{
                    "name": self.volume,
                    "capacityBytes": self.capacity,
                    "usedBytes": *self.used.lock().unwrap(),
                }]
            }]
        });
        Ok(serde_json::to_vec(&body)?)
    }
}

#[allow(dead_code)]
pub const THREE_MEMBER_CLUSTER: &str = r#"{
    "clusterName": "pg",
    "namespace": "default",
    "replicas": 3,
    "members": [
        {"name": "pg-0", "host": "pg-0.pg-headless", "dbPort": 5432},
        {"name": "pg-1", "host": "pg-1.pg-headless", "dbPort": 5432},
        {"name": "pg-2", "host": "pg-2.pg-headless", "dbPort": 5432}
    ],
    "leader": {"name": "pg-0"}
}"#;
