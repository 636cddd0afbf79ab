//! Disk-usage watermark protection.
//!
//! Polls the kubelet stats summary for this pod's volumes and flips the
//! database to read-only once any volume crosses its high watermark, then
//! back to read-write once every volume has dropped to its low watermark.
//! The gap between the two watermarks keeps a volume hovering around the
//! threshold from toggling the lock on every poll.

pub mod kubelet;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::DbManager;
use crate::error::{Result, WardenError};
use crate::events::{EventSink, ProbeEvent};

pub use kubelet::{KubeletStatsRequester, VolumeStatsRequester};

pub const REASON_LOCK: &str = "HighVolumeWatermark";
pub const REASON_UNLOCK: &str = "LowVolumeWatermark";
pub const LOCK_REASON: &str = "disk full";

/// Distance below the high watermark at which a locked instance is released
/// when no explicit low watermark is configured.
pub const DEFAULT_HYSTERESIS: u32 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionSpec {
    #[serde(default)]
    pub high_watermark: Option<i64>,
    #[serde(default)]
    pub low_watermark: Option<i64>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub name: String,
    #[serde(default)]
    pub high_watermark: Option<i64>,
    #[serde(default)]
    pub low_watermark: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStats {
    pub capacity_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
}

impl VolumeStats {
    /// Used space as a whole percentage, floored. `None` when either figure
    /// is missing or capacity is zero.
    pub fn percent(&self) -> Option<u64> {
        let capacity = self.capacity_bytes.filter(|c| *c > 0)?;
        let used = self.used_bytes?;
        Some((used as u128 * 100 / capacity as u128) as u64)
    }

    fn at_or_above(&self, watermark: u32) -> bool {
        match (self.capacity_bytes, self.used_bytes) {
            (Some(capacity), Some(used)) if capacity > 0 => {
                used as u128 * 100 >= capacity as u128 * watermark as u128
            }
            _ => false,
        }
    }

    fn at_or_below(&self, watermark: u32) -> bool {
        match (self.capacity_bytes, self.used_bytes) {
            (Some(capacity), Some(used)) if capacity > 0 => {
                used as u128 * 100 <= capacity as u128 * watermark as u128
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeExt {
    pub name: String,
    pub high_watermark: u32,
    pub low_watermark: u32,
    pub stats: VolumeStats,
}

impl VolumeExt {
    /// Over the high watermark. Missing data is never "over".
    pub fn is_over(&self) -> bool {
        self.high_watermark > 0 && self.stats.at_or_above(self.high_watermark)
    }

    /// Low enough to release the lock. Missing data always counts as released.
    pub fn is_released(&self) -> bool {
        self.high_watermark == 0 || self.stats.at_or_below(self.low_watermark)
    }
}

/// Watermarks outside [0, 100] fall back to the parent's value.
pub fn normalize_watermark(value: Option<i64>, default: u32) -> u32 {
    match value {
        Some(v) if (0..=100).contains(&v) => v as u32,
        _ => default,
    }
}

fn normalize_low(value: Option<i64>, high: u32, default: u32) -> u32 {
    normalize_watermark(value, default).min(high)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    /// At least one volume is over its high watermark.
    Higher,
    /// Every volume is at or below its low watermark.
    Lower,
    /// Somewhere in between: keep the current mode.
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    pub level: UsageLevel,
    pub transition: Option<Transition>,
    pub summary: String,
}

/// The engine as owned by the dispatcher and the background loop.
pub type SharedProtection = Arc<tokio::sync::Mutex<Protection>>;

pub struct Protection {
    requester: Arc<dyn VolumeStatsRequester>,
    pod: String,
    high_watermark: u32,
    low_watermark: u32,
    volumes: BTreeMap<String, VolumeExt>,
    readonly: bool,
    manager: Option<Arc<dyn DbManager>>,
    events: Option<Arc<dyn EventSink>>,
}

impl Protection {
    pub fn new(
        pod: impl Into<String>,
        spec: &ProtectionSpec,
        requester: Arc<dyn VolumeStatsRequester>,
    ) -> Self {
        let high_watermark = normalize_watermark(spec.high_watermark, 0);
        let low_watermark = normalize_low(
            spec.low_watermark,
            high_watermark,
            high_watermark.saturating_sub(DEFAULT_HYSTERESIS),
        );

        let volumes = spec
            .volumes
            .iter()
            .map(|v| {
                let high = normalize_watermark(v.high_watermark, high_watermark);
                let default_low = if high == high_watermark {
                    low_watermark
                } else {
                    high.saturating_sub(DEFAULT_HYSTERESIS)
                };
                let volume = VolumeExt {
                    name: v.name.clone(),
                    high_watermark: high,
                    low_watermark: normalize_low(v.low_watermark, high, default_low),
                    stats: VolumeStats::default(),
                };
                (v.name.clone(), volume)
            })
            .collect();

        Self {
            requester,
            pod: pod.into(),
            high_watermark,
            low_watermark,
            volumes,
            readonly: false,
            manager: None,
            events: None,
        }
    }

    /// Parses the JSON protection spec supplied through the environment.
    pub fn from_spec_json(
        pod: impl Into<String>,
        raw: &str,
        requester: Arc<dyn VolumeStatsRequester>,
    ) -> Result<Self> {
        let spec: ProtectionSpec = serde_json::from_str(raw).map_err(|e| {
            WardenError::Config(format!("invalid volume protection spec: {}", e))
        })?;
        Ok(Self::new(pod, &spec, requester))
    }

    pub fn with_manager(mut self, manager: Option<Arc<dyn DbManager>>) -> Self {
        self.manager = manager;
        self
    }

    /// `None` disables events entirely.
    pub fn with_events(mut self, events: Option<Arc<dyn EventSink>>) -> Self {
        self.events = events;
        self
    }

    pub fn into_shared(self) -> SharedProtection {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn high_watermark(&self) -> u32 {
        self.high_watermark
    }

    pub fn low_watermark(&self) -> u32 {
        self.low_watermark
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn volume(&self, name: &str) -> Option<&VolumeExt> {
        self.volumes.get(name)
    }

    pub fn volumes(&self) -> impl Iterator<Item = &VolumeExt> {
        self.volumes.values()
    }

    pub fn disabled(&self) -> bool {
        self.pod.is_empty()
            || self.volumes.is_empty()
            || self.volumes.values().all(|v| v.high_watermark == 0)
    }

    /// One full evaluation: fetch stats, update, check, transition.
    pub async fn run_cycle(&mut self) -> Result<UsageReport> {
        let summary = self.requester.request().await.map_err(|e| {
            tracing::error!("[VOLUME] request stats summary from kubelet error: {}", e);
            e
        })?;
        self.update_volume_stats(&summary)?;
        self.check_usage().await
    }

    pub fn update_volume_stats(&mut self, payload: &[u8]) -> Result<()> {
        let summary: kubelet::Summary = serde_json::from_slice(payload).map_err(|e| {
            tracing::error!("[VOLUME] stats summary obtained from kubelet error: {}", e);
            WardenError::Json(e.to_string())
        })?;

        let pod = match summary.pods.iter().find(|p| p.pod_ref.name == self.pod) {
            Some(p) => p,
            None => {
                tracing::debug!("[VOLUME] pod {} not present in stats summary", self.pod);
                return Ok(());
            }
        };
        for stats in &pod.volume_stats {
            if let Some(volume) = self.volumes.get_mut(&stats.name) {
                volume.stats = VolumeStats {
                    capacity_bytes: stats.capacity_bytes,
                    used_bytes: stats.used_bytes,
                };
            }
        }
        Ok(())
    }

    pub async fn check_usage(&mut self) -> Result<UsageReport> {
        let any_over = self.volumes.values().any(VolumeExt::is_over);
        let all_released = self.volumes.values().all(VolumeExt::is_released);
        let level = if any_over {
            UsageLevel::Higher
        } else if all_released {
            UsageLevel::Lower
        } else {
            UsageLevel::Steady
        };

        let summary = self.build_volumes_msg();
        let transition = match level {
            UsageLevel::Higher if !self.readonly => {
                self.high_watermark_reached(&summary).await?;
                Some(Transition::Locked)
            }
            UsageLevel::Lower if self.readonly => {
                self.low_watermark_reached(&summary).await?;
                Some(Transition::Unlocked)
            }
            _ => None,
        };

        Ok(UsageReport {
            level,
            transition,
            summary,
        })
    }

    async fn high_watermark_reached(&mut self, msg: &str) -> Result<()> {
        if self.readonly {
            return Ok(());
        }
        let manager = self.manager()?;
        if let Err(e) = manager.lock(LOCK_REASON).await {
            tracing::error!("[VOLUME] set instance to read-only error: {} volumes={}", e, msg);
            return Err(e);
        }
        tracing::info!("[VOLUME] set instance to read-only OK: {}", msg);
        self.readonly = true;
        self.send_event(REASON_LOCK, msg).await
    }

    async fn low_watermark_reached(&mut self, msg: &str) -> Result<()> {
        if !self.readonly {
            return Ok(());
        }
        let manager = self.manager()?;
        if let Err(e) = manager.unlock().await {
            tracing::error!("[VOLUME] reset instance to read-write error: {} volumes={}", e, msg);
            return Err(e);
        }
        tracing::info!("[VOLUME] reset instance to read-write OK: {}", msg);
        self.readonly = false;
        self.send_event(REASON_UNLOCK, msg).await
    }

    fn manager(&self) -> Result<Arc<dyn DbManager>> {
        self.manager
            .clone()
            .ok_or_else(|| WardenError::Engine("no database manager to lock or unlock".into()))
    }

    async fn send_event(&self, reason: &str, msg: &str) -> Result<()> {
        let sink = match &self.events {
            Some(s) => s,
            None => return Ok(()),
        };
        sink.send(&ProbeEvent::normal(reason, msg)).await.map_err(|e| {
            tracing::error!("[VOLUME] send {} event error: {}", reason, e);
            e
        })
    }

    /// `{"highWatermark":"90","volumes":[{"data":"92%"}]}`; a volume whose
    /// watermark differs from the global one carries its own.
    pub fn build_volumes_msg(&self) -> String {
        let volumes: Vec<serde_json::Value> = self
            .volumes
            .values()
            .map(|v| {
                let mut usage = serde_json::Map::new();
                if v.high_watermark != self.high_watermark {
                    usage.insert("highWatermark".into(), v.high_watermark.to_string().into());
                }
                let pct = match v.stats.percent() {
                    Some(p) => format!("{}%", p),
                    None => "<nil>".to_string(),
                };
                usage.insert(v.name.clone(), pct.into());
                serde_json::Value::Object(usage)
            })
            .collect();

        serde_json::json!({
            "highWatermark": self.high_watermark.to_string(),
            "volumes": volumes,
        })
        .to_string()
    }
}
