//! Background maintenance (spec §4.8 supplemental): reconciles drifted
//! connection statuses against the broker and deactivates stale sessions.
//!
//! Grounded on `scheduler.rs`'s `spawn_scheduler`: a `tokio::spawn`ed loop
//! ticking a `tokio::time::interval`, logging and continuing past
//! individual failures rather than aborting the whole loop.

use std::sync::Arc;
use std::time::Duration;

use crate::connection_registry::ConnectionRegistry;
use crate::store::Store;

/// How often the maintenance loop wakes up, independent of the per-entity
/// TTLs in `cache::ttl` — this governs DB/broker polling, not cache expiry.
pub const POLL_INTERVAL_SECS: u64 = 300;

/// Sessions idle longer than this are deactivated (spec §4.8 supplemental).
pub const STALE_SESSION_DAYS: i64 = 30;

/// Spawns the background maintenance loop. Returns the `JoinHandle` so
/// callers (the server binary, or a test) can abort it on shutdown.
pub fn spawn(store: Store, connections: Arc<ConnectionRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));

        loop {
            interval.tick().await;
            run_once(&store, &connections).await;
        }
    })
}

async fn run_once(store: &Store, connections: &ConnectionRegistry) {
    match store.reconcilable_connections() {
        Ok(pending) => {
            for connection in pending {
                let app_name = connection.app_name.clone();
                if let Err(e) = connections.reconcile_one(&connection).await {
                    tracing::warn!(
                        "failed to reconcile connection for app {}: {}",
                        app_name,
                        e
                    );
                }
            }
        }
        Err(e) => tracing::error!("failed to list reconcilable connections: {}", e),
    }

    let cutoff = chrono::Utc::now() - chrono::Duration::days(STALE_SESSION_DAYS);
    match store.deactivate_stale_sessions(cutoff) {
        Ok(count) if count > 0 => {
            tracing::info!("deactivated {} sessions idle over {} days", count, STALE_SESSION_DAYS);
        }
        Ok(_) => {}
        Err(e) => tracing::error!("failed to deactivate stale sessions: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_matches_spec() {
        assert_eq!(POLL_INTERVAL_SECS, 300);
    }

    #[test]
    fn stale_session_window_matches_spec() {
        assert_eq!(STALE_SESSION_DAYS, 30);
    }
}
