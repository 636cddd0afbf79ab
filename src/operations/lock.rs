use async_trait::async_trait;

use super::{not_implemented, Operation, OperationContext};
use crate::error::Result;
use crate::probe::{ops, OpsResult, ProbeRequest, ProbeResponse};

const DEFAULT_LOCK_REASON: &str = "manual";

/// Puts the instance into read-only mode.
pub struct LockInstance;

#[async_trait]
impl Operation for LockInstance {
    async fn invoke(
        &self,
        ctx: &OperationContext,
        req: &ProbeRequest,
        resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let manager = match &ctx.manager {
            Some(m) => m,
            None => return Ok(not_implemented(ops::LOCK_INSTANCE, ctx.engine(), resp)),
        };
        let reason = req.meta("reason").unwrap_or(DEFAULT_LOCK_REASON);
        match manager.lock(reason).await {
            Ok(()) => Ok(OpsResult::success(format!("instance locked: {}", reason))),
            Err(e) if e.is_unsupported() => {
                Ok(not_implemented(ops::LOCK_INSTANCE, ctx.engine(), resp))
            }
            Err(e) => {
                tracing::error!("[DISPATCH] lock instance failed: {}", e);
                Ok(OpsResult::failed(e.to_string()))
            }
        }
    }
}

pub struct UnlockInstance;

#[async_trait]
impl Operation for UnlockInstance {
    async fn invoke(
        &self,
        ctx: &OperationContext,
        _req: &ProbeRequest,
        resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let manager = match &ctx.manager {
            Some(m) => m,
            None => return Ok(not_implemented(ops::UNLOCK_INSTANCE, ctx.engine(), resp)),
        };
        match manager.unlock().await {
            Ok(()) => Ok(OpsResult::success("instance unlocked")),
            Err(e) if e.is_unsupported() => {
                Ok(not_implemented(ops::UNLOCK_INSTANCE, ctx.engine(), resp))
            }
            Err(e) => {
                tracing::error!("[DISPATCH] unlock instance failed: {}", e);
                Ok(OpsResult::failed(e.to_string()))
            }
        }
    }
}
