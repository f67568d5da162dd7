//! Liveness monitor: periodic probe sweep over the pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::pool::Pool;

/// Probe every session each `period`, starting one period from now.
pub fn spawn(pool: Arc<Pool>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?period, "liveness monitor started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            // A sweep that dies must not take the monitor with it.
            let sweep = tokio::spawn({
                let pool = Arc::clone(&pool);
                async move { pool.probe_all().await }
            });
            if let Err(e) = sweep.await {
                error!("liveness sweep failed: {e}");
            }
        }
    })
}
