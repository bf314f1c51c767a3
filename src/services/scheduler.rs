//! Fixed-cadence trigger for the promoter.

use crate::services::promoter_service::PromoterService;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{error, info};

/// Time from `now` until the next instant that is a whole multiple of
/// `period` since the Unix epoch (the top of the hour for one hour).
pub fn delay_until_next_tick(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let now_ms = now.timestamp_millis();
    let next_ms = (now_ms.div_euclid(period_ms) + 1) * period_ms;
    Duration::from_millis((next_ms - now_ms) as u64)
}

/// Run the promoter on every tick until the process exits. A failed run is
/// logged and the next tick proceeds normally.
pub fn spawn(promoter: PromoterService, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let delay = delay_until_next_tick(Utc::now(), period);
        info!(
            "scheduling promotions every {:?}, first in {:?}",
            period, delay
        );
        let mut ticks = interval_at(Instant::now() + delay, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticks.tick().await;
            match promoter.promote().await {
                Ok(report) => info!(
                    partition = %report.partition,
                    "scheduled promotion finished ({} classes)",
                    report.executions.len()
                ),
                Err(err) => error!("scheduled promotion failed: {}", err),
            }
        }
    })
}
