use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::{EngineError, Store};
use crate::observability::COMPACTIONS_TOTAL;

/// Compact the WAL if at least `threshold` events were appended since the last
/// compaction. Returns whether it compacted.
pub async fn maybe_compact(store: &Arc<Store>, threshold: u64) -> Result<bool, EngineError> {
    let appended = store.wal_appends_since_compact().await?;
    if appended < threshold {
        return Ok(false);
    }
    store.compact_wal().await?;
    info!("compacted WAL after {appended} appends");
    Ok(true)
}

/// Background task: check the WAL churn every `every` and compact past `threshold`.
pub async fn run_compactor(store: Arc<Store>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match maybe_compact(&store, threshold).await {
            Ok(true) => {
                metrics::counter!(COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            }
            Ok(false) => {}
            Err(e) => {
                metrics::counter!(COMPACTIONS_TOTAL, "status" => e.code()).increment(1);
                // Storage trouble is transient; try again next tick.
                error!("WAL compaction failed: {e}");
            }
        }
    }
}
