//! Named probe operations and the dispatcher that runs them.
//!
//! Every handler answers with an [`OpsResult`]; engine and DCS failures are
//! folded into `event=Failed` here so the transport never has to interpret a
//! raised error. The only error [`Dispatcher::invoke`] returns is a missing
//! request.

pub mod lock;
pub mod membership;
pub mod role;
pub mod switchover;
pub mod volume;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::AgentConfig;
use crate::dcs::{Cluster, Dcs};
use crate::engine::DbManager;
use crate::error::{Result, WardenError};
use crate::events::EventSink;
use crate::probe::{
    ops, OpsEvent, OpsResult, ProbeRequest, ProbeResponse, META_DURATION, META_END_TIME,
    META_OPERATION, META_START_TIME, META_STATUS_CODE, NOT_FOUND_STATUS,
};
use crate::volume::SharedProtection;

/// Everything an operation may touch. Built once by the entry point.
pub struct OperationContext {
    pub config: AgentConfig,
    pub manager: Option<Arc<dyn DbManager>>,
    pub dcs: Option<Arc<dyn Dcs>>,
    pub events: Option<Arc<dyn EventSink>>,
}

impl OperationContext {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            manager: None,
            dcs: None,
            events: None,
        }
    }

    pub fn with_manager(mut self, manager: Option<Arc<dyn DbManager>>) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_dcs(mut self, dcs: Option<Arc<dyn Dcs>>) -> Self {
        self.dcs = dcs;
        self
    }

    pub fn with_events(mut self, events: Option<Arc<dyn EventSink>>) -> Self {
        self.events = events;
        self
    }

    pub fn engine(&self) -> &str {
        &self.config.engine
    }

    pub async fn fetch_cluster(&self) -> Result<Cluster> {
        match &self.dcs {
            Some(dcs) => dcs.get_cluster().await,
            None => Err(WardenError::Dcs("DCS store is not configured".into())),
        }
    }
}

#[async_trait]
pub trait Operation: Send + Sync {
    /// Skip the handler with `db not ready` until the database has started.
    fn requires_ready(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        ctx: &OperationContext,
        req: &ProbeRequest,
        resp: &mut ProbeResponse,
    ) -> Result<OpsResult>;
}

/// Counts consecutive failures and opens once every `frequency` of them.
pub struct FailureGate {
    count: AtomicU64,
    frequency: u64,
}

impl FailureGate {
    pub fn new(frequency: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            frequency: frequency.max(1),
        }
    }

    /// Returns the new count and whether this failure should be reported.
    pub fn record_failure(&self) -> (u64, bool) {
        let n = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        (n, n % self.frequency == 0)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

pub fn not_implemented(op: &str, engine: &str, resp: &mut ProbeResponse) -> OpsResult {
    let message = format!("{} operation is not implemented for {}", op, engine);
    resp.metadata
        .insert(META_STATUS_CODE.to_string(), NOT_FOUND_STATUS.to_string());
    OpsResult::with_event(OpsEvent::NotImplemented, message)
}

pub struct Dispatcher {
    ctx: Arc<OperationContext>,
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl Dispatcher {
    /// A dispatcher with no operations registered.
    pub fn new(ctx: OperationContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            operations: HashMap::new(),
        }
    }

    /// The standard operation set. Role probes share one failure counter.
    pub fn with_builtin(ctx: OperationContext, protection: Option<SharedProtection>) -> Self {
        let frequency = ctx.config.failed_event_report_frequency;
        let role_probe = Arc::new(role::RoleProbeState::new(frequency));

        let mut dispatcher = Self::new(ctx);
        dispatcher.register(ops::CHECK_RUNNING, role::CheckRunning::new(frequency));
        dispatcher.register(ops::CHECK_ROLE, role::CheckRole::new(role_probe.clone()));
        dispatcher.register(ops::GET_ROLE, role::GetRole::new(role_probe));
        dispatcher.register(ops::SWITCHOVER, switchover::Switchover);
        dispatcher.register(ops::LOCK_INSTANCE, lock::LockInstance);
        dispatcher.register(ops::UNLOCK_INSTANCE, lock::UnlockInstance);
        dispatcher.register(ops::JOIN_MEMBER, membership::JoinMember);
        dispatcher.register(ops::LEAVE_MEMBER, membership::LeaveMember);
        dispatcher.register(
            ops::VOLUME_PROTECTION,
            volume::VolumeProtection::new(protection),
        );
        dispatcher
    }

    pub fn register<O: Operation + 'static>(&mut self, name: &str, operation: O) {
        self.operations
            .insert(name.to_string(), Arc::new(operation));
    }

    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn context(&self) -> &OperationContext {
        &self.ctx
    }

    pub async fn invoke(&self, req: Option<ProbeRequest>) -> Result<ProbeResponse> {
        let req = req.ok_or_else(|| WardenError::InvalidRequest("invoke request required".into()))?;

        let started = Instant::now();
        let mut resp = ProbeResponse::default();
        resp.metadata
            .insert(META_OPERATION.to_string(), req.operation.clone());
        resp.metadata
            .insert(META_START_TIME.to_string(), timestamp());

        let result = match self.operations.get(&req.operation) {
            None => {
                tracing::warn!(
                    "[DISPATCH] {} operation is not implemented for {}",
                    req.operation,
                    self.ctx.engine()
                );
                not_implemented(&req.operation, self.ctx.engine(), &mut resp)
            }
            Some(op) if op.requires_ready() && !self.db_ready().await => {
                OpsResult::failed("db not ready")
            }
            Some(op) => match op.invoke(&self.ctx, &req, &mut resp).await {
                Ok(res) => res,
                Err(e) => {
                    tracing::error!("[DISPATCH] {} failed: {}", req.operation, e);
                    OpsResult::failed(e.to_string())
                }
            },
        };

        tracing::debug!(
            operation = %req.operation,
            event = result.get_str("event").unwrap_or_default(),
            "[DISPATCH] operation called"
        );
        resp.data = result.to_vec();
        resp.metadata
            .insert(META_END_TIME.to_string(), timestamp());
        resp.metadata.insert(
            META_DURATION.to_string(),
            format!("{:?}", started.elapsed()),
        );
        Ok(resp)
    }

    async fn db_ready(&self) -> bool {
        match &self.ctx.manager {
            Some(m) => m.is_db_startup_ready().await,
            None => true,
        }
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}
