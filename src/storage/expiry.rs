//! Background Cache Sweeper
//!
//! Cache entries expire lazily: an entry past its TTL is dropped when someone
//! looks it up. An entry that is never looked up again would sit in memory
//! until eviction pushes it out, so this task purges expired entries on a
//! timer.
//!
//! ## Adaptive Frequency
//!
//! If a large share of the cache expired since the last sweep, the sweeper
//! runs more often. If nothing expired, it backs off.

use crate::storage::BlockDatabase;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the cache sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Base interval between sweeps (default: 1s)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 100ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 30s)
    pub max_interval: Duration,

    /// If this fraction of cached entries expired, speed up sweeping
    pub speedup_threshold: f64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            speedup_threshold: 0.25,
        }
    }
}

/// Handle to the running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct CacheSweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl CacheSweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub fn start(db: Arc<BlockDatabase>, config: SweeperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(db, config, shutdown_rx));

        info!("Cache sweeper started");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        debug!("Cache sweeper stopped");
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    db: Arc<BlockDatabase>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Cache sweeper received shutdown signal");
                    return;
                }
            }
        }

        let before = db.cache_entries();
        let expired = db.purge_expired_cache();

        if before > 0 {
            let rate = expired as f64 / before as f64;

            if rate > config.speedup_threshold {
                current_interval = (current_interval / 2).max(config.min_interval);
                debug!(
                    expired = expired,
                    rate = %format!("{:.2}%", rate * 100.0),
                    new_interval_ms = current_interval.as_millis(),
                    "High expiry rate, speeding up sweeper"
                );
            } else if expired == 0 {
                current_interval = (current_interval * 2).min(config.max_interval);
                trace!(
                    new_interval_ms = current_interval.as_millis(),
                    "Nothing expired, slowing down sweeper"
                );
            }
        }

        if expired > 0 {
            debug!(
                expired = expired,
                remaining = db.cache_entries(),
                "Expired cache entries purged"
            );
        }
    }
}
