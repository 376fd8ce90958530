use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::Orchestrator;

impl Orchestrator {
    /// Start the promotion and retention loops. They stop on [`Orchestrator::shutdown`].
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).promotion_loop()),
            tokio::spawn(Arc::clone(self).sweep_loop()),
        ]
    }

    /// Promote queued tasks whenever a slot frees up. The periodic tick
    /// re-checks memory so tasks held back by the circuit breaker resume
    /// once pressure drops.
    async fn promotion_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.settings.memory.check_interval_secs.max(1));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "promotion loop started");

        loop {
            let promoted = self.promote_ready();
            if promoted > 0 {
                debug!(promoted, queued = self.queue.len(), "promotion pass");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.admission.released().notified() => {}
                _ = tick.tick() => {}
            }
        }
        info!("promotion loop stopped");
    }

    /// Purge old terminal tasks and idle rate-limit windows.
    async fn sweep_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.settings.limits.sweep_interval_secs.max(1));
        let retention = Duration::from_secs(self.settings.limits.retention_hours * 3600);
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing is old enough yet.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let removed = self.registry.sweep(retention);
                    self.rate_limiter.prune();
                    debug!(removed, remaining = self.registry.len(), "retention sweep");
                }
            }
        }
        info!("sweep loop stopped");
    }
}
