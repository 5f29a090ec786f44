use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough events have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
        engine.notify.prune();
    }
}

/// Compact when at least `threshold` appends happened since the last
/// compaction. Returns whether it ran.
pub async fn compact_if_needed(
    engine: &Engine,
    threshold: u64,
) -> Result<bool, crate::engine::EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return Ok(false);
    }
    tracing::debug!("{appends} WAL appends since last compaction, compacting");
    engine.compact_wal().await?;
    Ok(true)
}
