//! services/api/src/web/sweeper.rs
//!
//! A background task that force-ends ongoing calls whose billing clock has
//! been running longer than the configured idle timeout. Covers clients that
//! vanished without sending an End.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hostline_core::ledger::CallLedger;

/// Spawns the sweep loop. A zero idle timeout disables the sweeper entirely
/// and nothing is spawned. The loop exits when `shutdown` is cancelled.
pub fn spawn_sweeper(
    ledger: Arc<CallLedger>,
    idle_timeout_secs: i64,
    sweep_interval_secs: u64,
    shutdown: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if idle_timeout_secs <= 0 {
        info!("idle-call sweeper disabled");
        return None;
    }

    info!(
        idle_timeout_secs,
        sweep_interval_secs, "starting idle-call sweeper"
    );
    Some(tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(sweep_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("idle-call sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }
            match ledger.sweep_stale_calls(idle_timeout_secs, Utc::now()).await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "swept stale calls"),
                Err(e) => error!("stale-call sweep failed: {}", e),
            }
        }
    }))
}
