//! Scheduled purge of lapsed revocation records, reset tokens and sessions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::service::AuthService;

/// Interval between cleanup runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(service: &AuthService) {
    match service.cleanup().await {
        Ok(count) if count > 0 => info!(count, "Cleaned up expired token records"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to clean up expired token records"),
    }
}

/// Spawn a background task that runs cleanup every `period`.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    service: Arc<AuthService>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            run_cleanup(&service).await;
        }
    })
}
