use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::{DurableStore, StoreError};

const COMPACT_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites the journal once enough appends pile up.
pub async fn run_compactor(store: Arc<DurableStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            tracing::error!("journal compaction failed: {e}");
        }
    }
}

/// Compact when more than `threshold` appends happened since the last compaction.
pub async fn compact_if_needed(store: &DurableStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends <= threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!("journal compacted after {appends} appends");
    Ok(true)
}
