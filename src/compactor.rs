use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::DurableStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once `threshold` appends have
/// piled up since the last compaction.
pub async fn run_compactor(store: Arc<DurableStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Returns the number of events written, if a compaction ran.
pub async fn compact_if_needed(store: &DurableStore, threshold: u64) -> Option<usize> {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return None;
    }
    match store.compact().await {
        Ok(events) => {
            info!(appends, events, "compacted WAL");
            Some(events)
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            None
        }
    }
}
