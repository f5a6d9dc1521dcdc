//! Periodic cancellation of abandoned pending placements.
//!
//! A buyer who closes the checkout page leaves a `pending` placement behind.
//! When the gateway never reports the session as expired, the sweeper
//! cancels it once it has seen no activity for `pending_timeout_secs`.
//! Activity is creation or the latest checkout start, so a buyer who is
//! paying right now keeps their placement.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jersey_core::config::SweeperConfig;
use jersey_core::{LifecycleError, PlacementEngine};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Cancels every pending placement idle since before `now - pending_timeout`.
///
/// Returns the number of placements cancelled.
pub fn sweep_once(
    engine: &PlacementEngine,
    pending_timeout: Duration,
    now: DateTime<Utc>,
) -> Result<usize, LifecycleError> {
    let timeout = chrono::Duration::from_std(pending_timeout).map_err(|e| {
        LifecycleError::Validation {
            field: "sweeper.pending_timeout_secs",
            reason: e.to_string(),
        }
    })?;
    let Some(cutoff) = now.checked_sub_signed(timeout) else {
        return Ok(0);
    };
    engine.cancel_stale_pending(cutoff)
}

/// Runs [`sweep_once`] on the blocking pool on every tick until `shutdown`
/// flips to `true`.
pub async fn run(
    engine: PlacementEngine,
    config: SweeperConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
    let pending_timeout = Duration::from_secs(config.pending_timeout_secs);
    info!(
        interval_secs = config.interval_secs,
        pending_timeout_secs = config.pending_timeout_secs,
        "pending sweeper started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {},
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("pending sweeper shutting down");
                    break;
                }
                continue;
            },
        }

        let sweep_engine = engine.clone();
        let swept = tokio::task::spawn_blocking(move || {
            sweep_once(&sweep_engine, pending_timeout, Utc::now())
        })
        .await;
        match swept {
            Ok(Ok(0)) => debug!("pending sweep found nothing"),
            Ok(Ok(cancelled)) => info!(cancelled, "pending sweep cancelled stale placements"),
            Ok(Err(e)) => warn!(error = %e, "pending sweep failed"),
            Err(e) => warn!(error = %e, "pending sweep task failed"),
        }
    }
}
