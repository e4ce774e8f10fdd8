//! Periodic overdue sweep.
//!
//! Marks pending entries past their due date as overdue on a fixed
//! interval until cancelled. The sweep is idempotent, so overlapping runs
//! from several replicas are harmless.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::services::entries::EntryStore;

/// Run the overdue sweep loop until `cancel` is triggered.
pub async fn run(entries: EntryStore, every: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = every.as_secs(),
        "Overdue sweep job started"
    );

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Overdue sweep job stopping");
                break;
            }
            _ = interval.tick() => {
                match entries.sweep_overdue().await {
                    Ok(0) => tracing::debug!("Overdue sweep: nothing to mark"),
                    Ok(swept) => tracing::info!(swept, "Overdue sweep: marked entries overdue"),
                    Err(e) => tracing::error!(error = %e, "Overdue sweep failed"),
                }
            }
        }
    }
}
