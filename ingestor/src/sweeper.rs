use crate::errors::Result;
use crate::metrics::{DEVICES_MARKED_OFFLINE_TOTAL, SWEEP_FAILURES_TOTAL};
use crate::store::PresenceStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Demotes devices silent for longer than `threshold` to offline, once per
/// `every`. Interval and threshold are independent knobs. A failed tick is
/// logged and retried on the next one.
pub async fn run_sweeper(
    presence: Arc<dyn PresenceStore>,
    every: Duration,
    threshold: chrono::Duration,
) {
    info!(
        "Starting presence sweeper: interval={}s, threshold={}s",
        every.as_secs(),
        threshold.num_seconds()
    );

    let mut ticker = interval(every);
    // Ticks are wall-clock scheduled; a missed tick is skipped, not queued.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // interval() fires immediately; the first real sweep happens one period in.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(presence.as_ref(), threshold).await {
            SWEEP_FAILURES_TOTAL.inc();
            error!("Presence sweep failed: {}", e);
        }
    }
}

/// One sweep tick: a single `now` snapshot, one conditional update at the
/// store. Returns the number of devices demoted.
pub async fn sweep_once(presence: &dyn PresenceStore, threshold: chrono::Duration) -> Result<u64> {
    let now = Utc::now();
    let flipped = presence.mark_stale_offline(threshold, now).await?;

    if flipped > 0 {
        DEVICES_MARKED_OFFLINE_TOTAL.inc_by(flipped as f64);
        info!("{} device(s) marked offline", flipped);
    } else {
        debug!("Sweep found no stale devices");
    }

    Ok(flipped)
}
