use std::time::Duration;

use chunkyard_assembly::AssemblyEngine;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Periodically reaps stale staging entries until `cancel` fires.
///
/// Uploads already reap on arrival; this covers idle periods where no
/// chunk comes in to trigger it.
pub fn spawn_reaper(
    engine: AssemblyEngine,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let engine = engine.clone();
                    match tokio::task::spawn_blocking(move || engine.reap()).await {
                        Ok(Ok(report)) if report.total() > 0 => {
                            tracing::debug!(removed = report.total(), "background reap finished");
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::warn!("background reap failed: {e}"),
                        Err(e) => tracing::warn!("background reap task failed: {e}"),
                    }
                }
                _ = cancel.cancelled() => {
                    break;
                }
            }
        }
    })
}
