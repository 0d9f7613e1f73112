//! Periodic deletion of old images

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::ObjectStore;

/// Spawn a task that deletes images older than `retention_days` every `every`
///
/// The first sweep runs immediately. The task exits when `shutdown` flips.
pub fn spawn_retention_sweep(
    store: Arc<dyn ObjectStore>,
    retention_days: u32,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - TimeDelta::days(i64::from(retention_days));
                    match store.cleanup_older_than(cutoff).await {
                        Ok(0) => {}
                        Ok(count) => info!("Cleaned up {} old images", count),
                        Err(e) => warn!("Retention sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
