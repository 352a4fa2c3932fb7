//! Periodic cleanup task: sweeps stale ledger entries and clears expired
//! bans on a fixed interval.

use crate::engine::BanEngine;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

pub async fn run(engine: BanEngine, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.purge_expired();
                engine.sweep_memory();
                debug!("cleanup sweep completed");
            }
            _ = shutdown_rx.recv() => {
                debug!("cleanup task shutting down");
                break;
            }
        }
    }
}
