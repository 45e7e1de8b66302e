use crate::config::EngineConfig;
use crate::domain::clock::ClockRef;
use crate::domain::ports::SimulationStoreRef;
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired: usize,
    pub purged: usize,
}

/// Marks lapsed simulations expired and purges old non-executed records.
#[derive(Clone)]
pub struct CleanupWorker {
    store: SimulationStoreRef,
    config: Arc<EngineConfig>,
    clock: ClockRef,
}

impl CleanupWorker {
    pub fn new(store: SimulationStoreRef, config: Arc<EngineConfig>, clock: ClockRef) -> Self {
        Self { store, config, clock }
    }

    /// Moves every `completed`/`failed` simulation past its expiry to `expired`.
    pub async fn expire_lapsed(&self) -> Result<usize> {
        let now = self.clock.now();
        let lease = self.config.claim_lease();
        let mut expired = 0;
        for id in self.store.lapsed(now, lease).await? {
            if self.store.mark_expired(id, now, lease).await? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Deletes `expired`/`failed` simulations older than the retention window.
    /// Executed simulations are never purged.
    pub async fn purge(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.config.retention();
        self.store.purge_terminal(cutoff).await
    }

    pub async fn run_once(&self) -> Result<CleanupReport> {
        let report = CleanupReport {
            expired: self.expire_lapsed().await?,
            purged: self.purge().await?,
        };
        info!(expired = report.expired, purged = report.purged, "cleanup pass");
        Ok(report)
    }

    /// Runs expiry and purge on their own intervals until `shutdown` flips
    /// to true or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut expiry = tokio::time::interval(Duration::from_secs(self.config.expiry_interval_secs.max(1)));
            let mut purge = tokio::time::interval(Duration::from_secs(self.config.purge_interval_secs.max(1)));
            expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);
            purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = expiry.tick() => match self.expire_lapsed().await {
                        Ok(expired) => info!(expired, "expiry pass"),
                        Err(err) => error!(%err, "expiry pass failed"),
                    },
                    _ = purge.tick() => match self.purge().await {
                        Ok(purged) => info!(purged, "purge pass"),
                        Err(err) => error!(%err, "purge pass failed"),
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("cleanup worker stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
