//! Startup and scheduled maintenance.

use crate::db::Database;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// One-off startup work: backfill default profiles.
pub async fn run_startup_tasks(db: &Database) {
    match db.profiles().ensure_defaults().await {
        Ok(count) if count > 0 => info!("Created {} default profiles", count),
        Ok(_) => {}
        Err(e) => error!("Failed to backfill profiles: {}", e),
    }
}

/// Run all cleanup tasks once.
///
/// Sessions older than the refresh token lifetime can no longer be named by
/// a verifiable refresh token, so they are removed.
pub async fn run_cleanup(db: &Database, session_max_age_secs: u64) {
    match db.sessions().delete_stale(session_max_age_secs).await {
        Ok(count) if count > 0 => info!("Cleaned up {} stale sessions", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up stale sessions: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    session_max_age_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db, session_max_age_secs).await;
        }
    })
}
