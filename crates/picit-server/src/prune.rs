use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use picit_db::Database;

/// Background task that deletes expired and revoked sessions.
///
/// Runs on an interval until `shutdown` is cancelled.
pub async fn run_prune_loop(db: Arc<Database>, interval_secs: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let db = db.clone();
        match tokio::task::spawn_blocking(move || db.prune_sessions()).await {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Prune: removed {} stale sessions", count);
                }
            }
            Ok(Err(e)) => warn!("Prune error: {:#}", e),
            Err(e) => warn!("Prune task failed: {}", e),
        }
    }
}
