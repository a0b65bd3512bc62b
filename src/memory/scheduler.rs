//! Explicit consolidation schedule task.
//!
//! Parses `consolidation.schedule` (`HH:MM`, local time), computes the next
//! fire instant, and blocks on a cancellable timer. On fire it runs the
//! consolidation pass; on startup it runs a catch-up pass when the last
//! completed run is older than 24 hours.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, Timelike};
use std::sync::Arc;
use tokio::sync::watch;

use crate::memory::consolidate::ConsolidationService;

/// Parse `HH:MM` into a local fire time.
pub fn parse_schedule(schedule: &str) -> Option<NaiveTime> {
    let (hours, minutes) = schedule.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Next occurrence of the fire time strictly after `now`.
pub fn next_fire(now: DateTime<Local>, fire_at: NaiveTime) -> DateTime<Local> {
    let today = now
        .with_hour(fire_at.hour())
        .and_then(|t| t.with_minute(fire_at.minute()))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Spawn the scheduler task. Send `true` on the returned channel to stop
/// it; a running pass finishes first (shutdown waits between steps, not
/// inside one).
pub fn spawn(
    service: Arc<ConsolidationService>,
    schedule: String,
    enabled: bool,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        if !enabled {
            tracing::info!("consolidation schedule disabled");
            return;
        }

        let Some(fire_at) = parse_schedule(&schedule) else {
            tracing::error!(schedule, "unparseable consolidation schedule, scheduler not running");
            return;
        };

        if service.needs_catchup() {
            tracing::info!("last consolidation stale, running startup catch-up");
            if let Err(err) = service.consolidate().await {
                tracing::error!(error = %err, "startup consolidation failed");
            }
        }

        loop {
            let next = next_fire(Local::now(), fire_at);
            let wait = (next - Local::now())
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));
            tracing::debug!(next = %next, "consolidation scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(err) = service.consolidate().await {
                        tracing::error!(error = %err, "scheduled consolidation failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("consolidation scheduler stopping");
                        return;
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}
