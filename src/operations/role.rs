//! Liveness and role probes.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{not_implemented, FailureGate, Operation, OperationContext};
use crate::dcs::Cluster;
use crate::engine::Role;
use crate::error::{Result, WardenError};
use crate::events::{spawn_send, ProbeEvent};
use crate::probe::{ops, OpsEvent, OpsResult, ProbeRequest, ProbeResponse};

const RUNNING_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

/// Share of the caller's probe timeout given to the role query, per second
/// of declared timeout. The remainder is left to the readiness-probe runner.
const ROLE_QUERY_BUDGET_PER_SEC: Duration = Duration::from_millis(800);

/// Failure counter and last observed role, shared by checkRole and getRole.
pub struct RoleProbeState {
    failures: FailureGate,
    last_role: Mutex<String>,
}

impl RoleProbeState {
    pub fn new(frequency: u64) -> Self {
        Self {
            failures: FailureGate::new(frequency),
            last_role: Mutex::new(String::new()),
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.count()
    }
}

/// Role query result before it is shaped into an [`OpsResult`].
enum Queried {
    Role(String),
    Unsupported,
    Failed(String),
}

async fn query_role(ctx: &OperationContext, deadline: Option<Duration>) -> Queried {
    let manager = match &ctx.manager {
        Some(m) => m.clone(),
        None => return Queried::Unsupported,
    };

    let query = async {
        let cluster = match &ctx.dcs {
            Some(_) => ctx.fetch_cluster().await?,
            None => Cluster::default(),
        };
        manager.get_replica_role(&cluster).await
    };

    let result = match deadline {
        Some(d) => match tokio::time::timeout(d, query).await {
            Ok(r) => r,
            Err(_) => Err(WardenError::Timeout(d.as_millis() as u64)),
        },
        None => query.await,
    };

    match result {
        Ok(role) => Queried::Role(role),
        Err(e) if e.is_unsupported() => Queried::Unsupported,
        Err(e) => Queried::Failed(e.to_string()),
    }
}

pub struct CheckRole {
    state: Arc<RoleProbeState>,
}

impl CheckRole {
    pub fn new(state: Arc<RoleProbeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Operation for CheckRole {
    async fn invoke(
        &self,
        ctx: &OperationContext,
        _req: &ProbeRequest,
        resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let deadline = ROLE_QUERY_BUDGET_PER_SEC * ctx.config.role_probe_timeout_secs as u32;
        let queried = query_role(ctx, Some(deadline)).await;

        // Held only to compare and swap; never across the query.
        let mut last_role = self.state.last_role.lock().await;

        let mut res = OpsResult::new();
        res.set("operation", ops::CHECK_ROLE);
        res.set("originalRole", last_role.as_str());

        let role = match queried {
            Queried::Role(role) => role,
            Queried::Unsupported => {
                let unsupported = not_implemented(ops::CHECK_ROLE, ctx.engine(), resp);
                for (k, v) in unsupported.into_inner() {
                    res.set(&k, v);
                }
                return Ok(res);
            }
            Queried::Failed(message) => {
                tracing::error!("[ROLE] executing checkRole error: {}", message);
                res.set_event(OpsEvent::Failed);
                res.set("message", message);
                let (count, report) = self.state.failures.record_failure();
                if report {
                    tracing::info!("[ROLE] role checks failed continuously, times={}", count);
                    if let Some(sink) = &ctx.events {
                        spawn_send(
                            sink.clone(),
                            ProbeEvent::warning(ops::CHECK_ROLE, String::from_utf8_lossy(&res.to_vec())),
                        );
                    }
                }
                return Ok(res);
            }
        };

        self.state.failures.reset();
        if !ctx.config.is_role_allowed(&role) {
            let err = WardenError::InvalidRole {
                role,
                allowed: ctx.config.allowed_roles(),
            };
            res.set_event(OpsEvent::Invalid);
            res.set("message", err.to_string());
            return Ok(res);
        }

        res.set_event(OpsEvent::Success);
        res.set("role", role.as_str());
        if let Some(class) = Role::normalize(&role) {
            res.set("roleClass", class.as_str());
        }
        if *last_role != role {
            tracing::info!("[ROLE] role changed: {:?} -> {:?}", *last_role, role);
            *last_role = role.clone();
            if !role.is_empty() {
                if let Some(sink) = &ctx.events {
                    spawn_send(
                        sink.clone(),
                        ProbeEvent::normal(ops::CHECK_ROLE, String::from_utf8_lossy(&res.to_vec())),
                    );
                }
            }
        }
        Ok(res)
    }
}

pub struct GetRole {
    state: Arc<RoleProbeState>,
}

impl GetRole {
    pub fn new(state: Arc<RoleProbeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Operation for GetRole {
    async fn invoke(
        &self,
        ctx: &OperationContext,
        _req: &ProbeRequest,
        resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        match query_role(ctx, None).await {
            Queried::Role(role) => {
                let mut res = OpsResult::new();
                res.set_event(OpsEvent::Success);
                res.set("role", role);
                Ok(res)
            }
            Queried::Unsupported => Ok(not_implemented(ops::GET_ROLE, ctx.engine(), resp)),
            Queried::Failed(message) => {
                tracing::error!("[ROLE] error executing getRole: {}", message);
                let (count, report) = self.state.failures.record_failure();
                if report {
                    tracing::info!("[ROLE] getRole failed continuously, times={}", count);
                }
                Ok(OpsResult::failed(message))
            }
        }
    }
}

/// TCP reachability of the database port.
pub struct CheckRunning {
    failures: FailureGate,
}

impl CheckRunning {
    pub fn new(frequency: u64) -> Self {
        Self {
            failures: FailureGate::new(frequency),
        }
    }
}

#[async_trait]
impl Operation for CheckRunning {
    // This is how readiness is observed, so it cannot wait for it.
    fn requires_ready(&self) -> bool {
        false
    }

    async fn invoke(
        &self,
        ctx: &OperationContext,
        _req: &ProbeRequest,
        _resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let host = format!("{}:{}", ctx.config.db_address, ctx.config.db_port);
        let connected = tokio::time::timeout(RUNNING_CHECK_TIMEOUT, TcpStream::connect(&host)).await;

        let mut res = OpsResult::new();
        res.set("operation", ops::CHECK_RUNNING);
        match connected {
            Ok(Ok(_stream)) => {
                self.failures.reset();
                res.set_event(OpsEvent::Success);
                res.set("message", "TCP connection established");
            }
            Ok(Err(e)) => self.fail(ctx, &mut res, &host, &e.to_string()),
            Err(_) => self.fail(ctx, &mut res, &host, "connect timed out"),
        }
        Ok(res)
    }
}

impl CheckRunning {
    fn fail(&self, ctx: &OperationContext, res: &mut OpsResult, host: &str, cause: &str) {
        tracing::error!("[ROLE] running check {} error: {}", host, cause);
        res.set_event(OpsEvent::Failed);
        res.set("message", format!("running check {} error", host));
        let (count, report) = self.failures.record_failure();
        if report {
            tracing::info!("[ROLE] running checks failed continuously, times={}", count);
            if let Some(sink) = &ctx.events {
                spawn_send(
                    sink.clone(),
                    ProbeEvent::warning(ops::CHECK_RUNNING, String::from_utf8_lossy(&res.to_vec())),
                );
            }
        }
    }
}
