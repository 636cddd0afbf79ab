//! In-memory stand-ins for the manager, DCS, event and kubelet seams.
//!
//! Compiled for unit tests and behind the `testing` feature so the HTTP
//! crate and integration tests can drive the dispatcher without a database.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::dcs::{Cluster, Dcs, HaConfig, Member, StaticDcs};
use crate::engine::{DbManager, DbManagerBase};
use crate::error::{Result, WardenError};
use crate::events::{EventSink, ProbeEvent};
use crate::volume::VolumeStatsRequester;

/// Scriptable [`DbManager`]. Every capability call is counted by name and
/// can be made to fail with [`FakeManager::fail`].
pub struct FakeManager {
    base: DbManagerBase,
    calls: DashMap<String, usize>,
    failing: DashSet<String>,
    unhealthy: DashSet<String>,
    running: AtomicBool,
    promoted: AtomicBool,
    role: Mutex<Option<String>>,
    role_delay: Mutex<Option<Duration>>,
    lock_delay: Mutex<Option<Duration>>,
    lock_reason: Mutex<Option<String>>,
}

impl FakeManager {
    pub fn new(member_name: &str) -> Self {
        Self {
            base: DbManagerBase::new("fake", member_name),
            calls: DashMap::new(),
            failing: DashSet::new(),
            unhealthy: DashSet::new(),
            running: AtomicBool::new(true),
            promoted: AtomicBool::new(true),
            role: Mutex::new(None),
            role_delay: Mutex::new(None),
            lock_delay: Mutex::new(None),
            lock_reason: Mutex::new(None),
        }
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.get(method).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn fail(&self, method: &str) {
        self.failing.insert(method.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_promoted(&self, promoted: bool) {
        self.promoted.store(promoted, Ordering::SeqCst);
    }

    /// Without a role the fake reports role queries as unsupported.
    pub fn set_role(&self, role: &str) {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner) = Some(role.to_string());
    }

    pub fn set_role_delay(&self, delay: Duration) {
        *self.role_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Makes `lock` sleep before it takes effect.
    pub fn set_lock_delay(&self, delay: Duration) {
        *self.lock_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn set_unhealthy(&self, member: &str) {
        self.unhealthy.insert(member.to_string());
    }

    pub fn last_lock_reason(&self) -> Option<String> {
        self.lock_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, method: &str) -> Result<()> {
        *self.calls.entry(method.to_string()).or_insert(0) += 1;
        if self.failing.contains(method) {
            return Err(WardenError::Engine(format!("{} failed", method)));
        }
        Ok(())
    }
}

#[async_trait]
impl DbManager for FakeManager {
    fn base(&self) -> &DbManagerBase {
        &self.base
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn is_member_healthy(&self, _cluster: &Cluster, member: &Member) -> bool {
        !self.unhealthy.contains(&member.name)
    }

    async fn is_leader(&self, cluster: &Cluster) -> Result<bool> {
        Ok(cluster
            .leader
            .as_ref()
            .map(|l| l.name == self.current_member_name())
            .unwrap_or(false))
    }

    async fn join_current_member_to_cluster(&self, _cluster: &Cluster) -> Result<()> {
        self.record("join")
    }

    async fn leave_member_from_cluster(&self, _cluster: &Cluster, _member_name: &str) -> Result<()> {
        self.record("leave")
    }

    async fn promote(&self, _cluster: &Cluster) -> Result<()> {
        self.record("promote")
    }

    async fn demote(&self) -> Result<()> {
        self.record("demote")
    }

    async fn follow(&self, _cluster: &Cluster) -> Result<()> {
        self.record("follow")
    }

    async fn recover(&self) -> Result<()> {
        self.record("recover")
    }

    async fn is_promoted(&self) -> bool {
        self.promoted.load(Ordering::SeqCst)
    }

    async fn get_replica_role(&self, _cluster: &Cluster) -> Result<String> {
        let delay = *self.role_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record("get_replica_role")?;
        self.role
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| WardenError::NotImplemented("getRole".into()))
    }

    async fn lock(&self, reason: &str) -> Result<()> {
        let delay = *self.lock_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record("lock")?;
        *self.lock_reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        self.record("unlock")
    }
}

/// Keeps every event it is handed.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ProbeEvent>>,
    failing: AtomicBool,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    /// Polls until at least `n` events arrived or `timeout` passed.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<ProbeEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= n || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn send(&self, event: &ProbeEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WardenError::Event("sink unavailable".into()));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Serves a fixed stats summary; clones share the payload.
#[derive(Clone)]
pub struct StaticStatsRequester {
    payload: Arc<Mutex<Vec<u8>>>,
}

impl Default for StaticStatsRequester {
    fn default() -> Self {
        Self {
            payload: Arc::new(Mutex::new(br#"{"pods":[]}"#.to_vec())),
        }
    }
}

impl StaticStatsRequester {
    pub fn set(&self, payload: Vec<u8>) {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = payload;
    }
}

#[async_trait]
impl VolumeStatsRequester for StaticStatsRequester {
    async fn request(&self) -> Result<Vec<u8>> {
        Ok(self
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// [`StaticDcs`] that counts writes and can refuse them.
pub struct CountingDcs {
    inner: StaticDcs,
    writes: DashMap<&'static str, usize>,
    failing: AtomicBool,
}

impl CountingDcs {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            inner: StaticDcs::new(cluster),
            writes: DashMap::new(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn writes(&self, method: &'static str) -> usize {
        self.writes.get(method).map(|c| *c).unwrap_or(0)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    fn record(&self, method: &'static str) -> Result<()> {
        *self.writes.entry(method).or_insert(0) += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(WardenError::Dcs(format!("{} rejected", method)));
        }
        Ok(())
    }
}

#[async_trait]
impl Dcs for CountingDcs {
    fn cluster_name(&self) -> String {
        self.inner.cluster_name()
    }

    async fn get_cluster(&self) -> Result<Cluster> {
        self.inner.get_cluster().await
    }

    async fn create_switchover(&self, leader: &str, candidate: &str) -> Result<()> {
        self.record("create_switchover")?;
        self.inner.create_switchover(leader, candidate).await
    }

    async fn update_ha_config(&self, ha_config: &HaConfig) -> Result<()> {
        self.record("update_ha_config")?;
        self.inner.update_ha_config(ha_config).await
    }
}
