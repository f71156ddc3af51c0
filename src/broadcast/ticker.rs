//! Cron trigger for broadcast runs.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::broadcast::scheduler::BroadcastScheduler;
use crate::error::ConfigError;

/// Parse a cron expression (with seconds field), evaluated in UTC.
pub fn parse_schedule(schedule: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(schedule).map_err(|e| ConfigError::InvalidValue {
        key: "broadcast schedule".into(),
        message: format!("invalid cron: {e}"),
    })
}

/// Next fire time strictly after `after`.
pub fn next_fire_after(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Spawn the background task that runs the broadcast on `schedule`.
///
/// The first run happens at the first fire time, not immediately. Runs never
/// overlap: a run that overshoots the next fire time delays it.
pub fn register_scheduled_job(
    scheduler: Arc<BroadcastScheduler>,
    schedule: &str,
) -> Result<tokio::task::JoinHandle<()>, ConfigError> {
    let schedule = parse_schedule(schedule)?;

    Ok(tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_fire_after(&schedule, now) else {
                tracing::warn!("Broadcast schedule has no upcoming fire time, stopping ticker");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next = %next, "Next broadcast scheduled");
            tokio::time::sleep(wait).await;

            match scheduler.run_once().await {
                Ok(report) => tracing::debug!(?report, "Scheduled broadcast complete"),
                Err(e) => tracing::error!("Scheduled broadcast aborted: {e}"),
            }
        }
    }))
}
