use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::AppState;

/// Start the background expiration cleaner task.
///
/// Expired sessions are also dropped lazily on read; the sweep bounds how
/// long a dead entry can linger without being touched.
pub fn start_expiration_cleaner(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.tokens.cleanup_interval_seconds);

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_cleanup(&state).await;
        }
    })
}

async fn run_cleanup(state: &AppState) {
    debug!("Running expiration cleanup");

    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || db.delete_expired_sessions()).await;

    match result {
        Ok(Ok(count)) if count > 0 => debug!(sessions_cleaned = count, "Expired sessions cleaned"),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(error = %e, "Failed to clean up expired sessions"),
        Err(e) => error!(error = %e, "Expiration cleanup task panicked"),
    }
}
