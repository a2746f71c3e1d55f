use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Periodically sweeps expired reservations out of every slot. Optional:
/// without it, expiry still happens lazily on the next reservation attempt.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let removed = reap_once(&engine).await;
        if removed > 0 {
            info!("reaped {removed} expired reservations");
        }
    }
}

/// One sweep pass. Returns the number of reservations removed.
pub async fn reap_once(engine: &Engine) -> usize {
    let mut removed = 0;
    for loc in engine.collect_expired(engine.now_ms()) {
        match engine.expire_slot(loc.building_id, loc.floor, loc.slot).await {
            Ok(gone) => removed += gone.len(),
            // The building may have been deleted or left in the meantime.
            Err(e) => debug!("reaper skip {}/{}/{}: {e}", loc.building_id, loc.floor, loc.slot),
        }
    }
    removed
}

/// Compact the WAL whenever enough appends have piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!("WAL compaction failed: {e}");
        }
    }
}
