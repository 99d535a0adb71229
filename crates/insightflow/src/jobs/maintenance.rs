use crate::jobs::queue::ExtractionQueue;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Running jobs past the staleness limit, pushed back through a retryable failure.
    pub stale_reaped: usize,
    /// Retrying jobs whose backoff elapsed, moved back to queued.
    pub promoted: u64,
    pub outstanding: usize,
}

/// "now - stale_after"; a running job that started before this is stale.
pub fn stale_cutoff(now: DateTime<Utc>, stale_after: Duration) -> DateTime<Utc> {
    now - stale_after
}

/// Periodic `maintain()` until `shutdown` flips to true.
pub async fn run_loop(
    queue: Arc<ExtractionQueue>,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        match queue.maintain().await {
            Ok(r) if r.stale_reaped > 0 || r.promoted > 0 => tracing::info!(
                stale_reaped = r.stale_reaped,
                promoted = r.promoted,
                outstanding = r.outstanding,
                "maintenance pass"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "maintenance pass failed"),
        }
    }
}
