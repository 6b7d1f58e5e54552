//! Periodic expiry sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::entitlement::EntitlementEvaluator;
use crate::clock::Clock;
use crate::error::Result;

/// Run a single sweep at the clock's current instant.
pub async fn run_sweep_once(evaluator: &EntitlementEvaluator, clock: &dyn Clock) -> Result<u64> {
    let now = clock.now();
    tracing::debug!(now = %now, "Running expiry sweep");
    evaluator.expire_overdue_transactions(now).await
}

/// Spawn the background sweep loop. A failed run is logged and the next tick
/// acts as the retry.
pub fn spawn_expiry_sweeper(
    evaluator: EntitlementEvaluator,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Starting expiry sweeper");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Expiry sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = run_sweep_once(&evaluator, clock.as_ref()).await {
                        tracing::error!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        }
    })
}
