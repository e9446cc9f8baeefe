use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::info;

use crate::engine::Engine;

/// Background task that moves confirmed bookings past their end instant
/// to completed.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = Local::now().naive_local();
        let elapsed = engine.collect_elapsed(now);
        for id in elapsed {
            match engine.complete_booking(id).await {
                Ok(_) => info!("completed elapsed booking {id}"),
                Err(e) => {
                    // May have been cancelled or completed meanwhile
                    tracing::debug!("sweeper skip {id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(300));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
