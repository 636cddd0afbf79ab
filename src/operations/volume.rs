use async_trait::async_trait;

use super::{Operation, OperationContext};
use crate::error::Result;
use crate::probe::{OpsResult, ProbeRequest, ProbeResponse};
use crate::volume::{SharedProtection, Transition, UsageLevel};

const DISABLED: &str = "the volume protection operation is disabled";

/// One watermark evaluation per call. The engine sits behind an async mutex
/// so cycles from the probe path and the background loop never overlap, and
/// each cycle runs to completion even if the caller is dropped.
pub struct VolumeProtection {
    protection: Option<SharedProtection>,
}

impl VolumeProtection {
    pub fn new(protection: Option<SharedProtection>) -> Self {
        Self { protection }
    }
}

#[async_trait]
impl Operation for VolumeProtection {
    async fn invoke(
        &self,
        _ctx: &OperationContext,
        _req: &ProbeRequest,
        _resp: &mut ProbeResponse,
    ) -> Result<OpsResult> {
        let engine = match &self.protection {
            Some(p) => p.clone(),
            None => return Ok(OpsResult::failed(DISABLED)),
        };

        // The cycle runs detached: a caller that gives up mid-lock must not
        // leave the database locked with the readonly flag unset.
        let cycle = tokio::spawn(async move {
            let mut protection = engine.lock().await;
            if protection.disabled() {
                return None;
            }
            let report = protection.run_cycle().await;
            Some((report, protection.readonly()))
        });

        let (report, readonly) = match cycle.await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return Ok(OpsResult::failed(DISABLED)),
            Err(e) => {
                tracing::error!("[VOLUME] protection cycle aborted: {}", e);
                return Ok(OpsResult::failed(format!("volume protection cycle aborted: {}", e)));
            }
        };

        match report {
            Ok(report) => {
                let mut res = OpsResult::success("volume usage checked");
                res.set("protect", report.summary);
                res.set("level", level_str(report.level));
                if let Some(t) = report.transition {
                    res.set(
                        "transition",
                        match t {
                            Transition::Locked => "locked",
                            Transition::Unlocked => "unlocked",
                        },
                    );
                }
                res.set("readonly", readonly);
                Ok(res)
            }
            Err(e) => {
                let mut res = OpsResult::failed(e.to_string());
                res.set("readonly", readonly);
                Ok(res)
            }
        }
    }
}

fn level_str(level: UsageLevel) -> &'static str {
    match level {
        UsageLevel::Higher => "higher",
        UsageLevel::Lower => "lower",
        UsageLevel::Steady => "steady",
    }
}
