//! Periodic liveness and retention sweeps.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::hub::Hub;

/// Spawn both sweep loops on `tracker`. They stop when `shutdown` is cancelled.
pub fn spawn_sweepers(hub: Arc<Hub>, tracker: &TaskTracker, shutdown: CancellationToken) {
    let interval = hub.config().heartbeat_interval();
    let heartbeat_hub = Arc::clone(&hub);
    tracker.spawn(run_every(interval, shutdown.clone(), "heartbeat", move || {
        let hub = Arc::clone(&heartbeat_hub);
        async move {
            hub.sweep_heartbeats();
        }
    }));

    let interval = hub.config().retention_sweep_interval();
    tracker.spawn(run_every(interval, shutdown, "retention", move || {
        let hub = Arc::clone(&hub);
        async move {
            if let Err(e) = hub.sweep_retention().await {
                tracing::error!(error = %e, "Retention sweep failed");
            }
        }
    }));
}

async fn run_every<F, Fut>(period: Duration, shutdown: CancellationToken, name: &'static str, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(sweep = name, period_ms = period.as_millis() as u64, "Sweeper started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => tick().await,
        }
    }

    tracing::debug!(sweep = name, "Sweeper stopped");
}
