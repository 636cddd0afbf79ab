use async_trait::async_trait;

use super::{Operation, OperationContext};
use crate::error::Result;
use crate::probe::{OpsResult, ProbeRequest, ProbeResponse};

const NOTHING_TO_DO: &str = "no database manager registered, nothing to do";

pub struct JoinMember;

#[async_trait]
impl Operation for JoinMember {
    async fn invoke(
        &self,
        ctx: &OperationContext,
        _req: &ProbeRequest,
        _resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let manager = match &ctx.manager {
            Some(m) => m.clone(),
            None => return Ok(OpsResult::success(NOTHING_TO_DO)),
        };
        let cluster = match ctx.fetch_cluster().await {
            Ok(c) => c,
            Err(e) => return Ok(OpsResult::failed(format!("get cluster failed: {}", e))),
        };

        if let Err(e) = manager.join_current_member_to_cluster(&cluster).await {
            tracing::error!("[DISPATCH] join member to cluster error: {}", e);
            return Ok(OpsResult::failed(e.to_string()));
        }
        Ok(OpsResult::success("join of the current member is complete"))
    }
}

pub struct LeaveMember;

#[async_trait]
impl Operation for LeaveMember {
    async fn invoke(
        &self,
        ctx: &OperationContext,
        _req: &ProbeRequest,
        _resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let manager = match &ctx.manager {
            Some(m) => m.clone(),
            None => return Ok(OpsResult::success(NOTHING_TO_DO)),
        };
        let dcs = match &ctx.dcs {
            Some(d) => d.clone(),
            None => return Ok(OpsResult::failed("DCS store is not configured")),
        };
        let mut cluster = match dcs.get_cluster().await {
            Ok(c) => c,
            Err(e) => return Ok(OpsResult::failed(format!("get cluster failed: {}", e))),
        };

        let current = manager.current_member_name().to_string();
        // Mark first so observers do not treat the departing member as healthy.
        if !cluster.ha_config.is_deleting(&current)
            && cluster.ha_config.add_member_to_delete(&current)
        {
            if let Err(e) = dcs.update_ha_config(&cluster.ha_config).await {
                tracing::error!("[DISPATCH] mark {} as deleting failed: {}", current, e);
                return Ok(OpsResult::failed(format!("update ha config failed: {}", e)));
            }
        }

        if let Err(e) = manager.leave_member_from_cluster(&cluster, &current).await {
            tracing::error!("[DISPATCH] leave member from cluster error: {}", e);
            return Ok(OpsResult::failed(e.to_string()));
        }
        Ok(OpsResult::success("left member is complete"))
    }
}
