use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::lifecycle::Lifecycle;

/// Background task that removes expired messages and their blobs.
///
/// Off unless configured: reads already refuse expired messages, so this
/// only reclaims space.
pub async fn run_reaper_loop(lifecycle: Lifecycle, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match lifecycle.reap_expired_at(Utc::now()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Reaper: removed {} expired messages", count);
                }
            }
            Err(e) => {
                warn!("Reaper error: {}", e);
            }
        }
    }
}

/// Background task that deletes the images of burned messages once the
/// signed URL given to their viewer has expired.
pub async fn run_blob_sweep_loop(lifecycle: Lifecycle, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match lifecycle.reclaim_blobs_at(Utc::now()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Blob sweep: removed {} images of burned messages", count);
                }
            }
            Err(e) => {
                warn!("Blob sweep error: {}", e);
            }
        }
    }
}
