//! Background refresh of the admin system-metrics snapshot.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AppState, rfc3339};
use crate::storage::StorageError;

/// Recomputes the snapshot once and stores it in the shared cache.
pub async fn refresh_once(state: &AppState) -> Result<(), StorageError> {
    let mut snapshot = state.store.system_metrics().await?;
    snapshot.refreshed_at = Some(rfc3339(chrono::Utc::now().naive_utc()));
    debug!(
        users = snapshot.total_users,
        children = snapshot.total_children,
        "metrics refreshed"
    );
    state.replace_metrics(snapshot).await;
    Ok(())
}

/// Refreshes every `metrics_refresh_secs` until the shutdown token fires.
pub fn spawn_refresher(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.metrics_refresh_secs.max(1));
    let token = state.shutdown_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "metrics refresher started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = refresh_once(&state).await {
                        warn!(error=%e, "metrics refresh failed");
                    }
                }
            }
        }
        info!("metrics refresher stopped");
    })
}
