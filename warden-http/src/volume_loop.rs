//! Periodic volume-protection evaluation.
//!
//! The orchestrator may also drive cycles through the `volumeProtection`
//! operation; both paths share the same engine behind its mutex, so a slow
//! kubelet never causes overlapping cycles.

use warden::volume::SharedProtection;

/// Spawn a background task that evaluates volume usage on a timer.
/// Configurable via WARDEN_VOLUME_PROTECTION_INTERVAL_SECS (0 disables).
pub fn spawn_volume_protection(protection: SharedProtection, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await; // skip first immediate tick

        loop {
            interval.tick().await;
            run_volume_cycle(&protection).await;
        }
    });
}

/// Run one evaluation. Public for testing.
pub async fn run_volume_cycle(protection: &SharedProtection) {
    let mut engine = protection.lock().await;
    if engine.disabled() {
        return;
    }
    match engine.run_cycle().await {
        Ok(report) => tracing::debug!(
            level = ?report.level,
            transition = ?report.transition,
            "[VOLUME] {}",
            report.summary
        ),
        Err(e) => tracing::warn!("[VOLUME] protection cycle failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use warden::engine::DbManager;
    use warden::testing::{FakeManager, StaticStatsRequester};
    use warden::volume::Protection;

    fn usage(used: u64) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "pods": [{"podRef": {"name": "pg-0"}, "volume": [
                {"name": "data", "capacityBytes": 100, "usedBytes": used}
            ]}]
        }))
        .unwrap()
    }

    fn protection(mgr: &Arc<FakeManager>, requester: &StaticStatsRequester) -> SharedProtection {
        Protection::from_spec_json(
            "pg-0",
            r#"{"highWatermark":90,"volumes":[{"name":"data"}]}"#,
            Arc::new(requester.clone()),
        )
        .unwrap()
        .with_manager(Some(mgr.clone() as Arc<dyn DbManager>))
        .into_shared()
    }

    #[tokio::test]
    async fn cycle_locks_and_unlocks() {
        let mgr = Arc::new(FakeManager::new("pg-0"));
        let requester = StaticStatsRequester::default();
        let p = protection(&mgr, &requester);

        requester.set(usage(93));
        run_volume_cycle(&p).await;
        run_volume_cycle(&p).await;
        assert_eq!(mgr.calls("lock"), 1);
        assert!(p.lock().await.readonly());

        requester.set(usage(85));
        run_volume_cycle(&p).await;
        assert_eq!(mgr.calls("unlock"), 1);
        assert!(!p.lock().await.readonly());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_skips_first_tick_then_runs() {
        let mgr = Arc::new(FakeManager::new("pg-0"));
        let requester = StaticStatsRequester::default();
        requester.set(usage(95));
        spawn_volume_protection(protection(&mgr, &requester), 10);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mgr.calls("lock"), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(mgr.calls("lock"), 1);
    }

    #[tokio::test]
    async fn zero_interval_is_disabled() {
        let mgr = Arc::new(FakeManager::new("pg-0"));
        let requester = StaticStatsRequester::default();
        requester.set(usage(95));
        spawn_volume_protection(protection(&mgr, &requester), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mgr.calls("lock"), 0);
    }
}
