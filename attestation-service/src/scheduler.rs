use std::sync::Arc;
use std::time::Duration as StdDuration;

use ledger_client::domain::DailyDigest;
use ledger_client::LedgerStore;
use time::{Date, Duration, OffsetDateTime, Time};

use crate::aggregate::{hour_window, AggregateError, Aggregator};
use crate::anchor::AnchorCoordinator;

/// One unit of schedulable work. Periodic loops and the manual API route
/// everything through [`RecomputeScheduler::fire`], which keeps the
/// recompute logic independent of whatever drives the triggers.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Aggregate the UTC hour containing `instant` for every site.
    HourlyBatch { instant: OffsetDateTime },
    /// Aggregate a UTC calendar day for every site.
    DailyBatch { day: Date },
    /// Recompute one (site, day): manual recompute, backfill,
    /// purge-then-rebuild.
    Recompute { site_id: String, day: Date },
}

pub(crate) fn next_hour_boundary(now: OffsetDateTime) -> OffsetDateTime {
    hour_window(now).1
}

pub(crate) fn next_daily_run(now: OffsetDateTime, at: Time) -> OffsetDateTime {
    let candidate = now.date().with_time(at).assume_utc();
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

fn until(now: OffsetDateTime, next: OffsetDateTime) -> StdDuration {
    let ms = (next - now).whole_milliseconds().max(0);
    StdDuration::from_millis(ms as u64)
}

fn run_id(kind: &str) -> String {
    format!("{kind}-{}", OffsetDateTime::now_utc().unix_timestamp_nanos())
}

/// Drives periodic and on-demand recomputation across all configured sites.
pub struct RecomputeScheduler {
    store: Arc<dyn LedgerStore>,
    aggregator: Arc<Aggregator>,
    anchor: Option<Arc<AnchorCoordinator>>,
    anchor_delay: StdDuration,
    daily_run_utc: Time,
}

impl RecomputeScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        aggregator: Arc<Aggregator>,
        anchor: Option<Arc<AnchorCoordinator>>,
        anchor_delay: StdDuration,
        daily_run_utc: Time,
    ) -> Self {
        Self {
            store,
            aggregator,
            anchor,
            anchor_delay,
            daily_run_utc,
        }
    }

    pub async fn fire(&self, trigger: Trigger) {
        match trigger {
            Trigger::HourlyBatch { instant } => self.run_hourly_batch(instant).await,
            Trigger::DailyBatch { day } => self.run_daily_batch(day).await,
            Trigger::Recompute { site_id, day } => {
                if let Err(e) = self.recompute(&site_id, day).await {
                    tracing::error!(
                        site = %site_id,
                        day = %day,
                        error = %e,
                        "on-demand recompute failed"
                    );
                }
            }
        }
    }

    /// On-demand recompute of one (site, day), scheduling an anchor
    /// submission when anchoring is enabled and the day produced a digest.
    pub async fn recompute(
        &self,
        site_id: &str,
        day: Date,
    ) -> Result<Option<DailyDigest>, AggregateError> {
        let run_id = run_id("recompute");
        self.daily_for_site(site_id, day, &run_id).await
    }

    /// Hourly aggregation for every site. A failing site is logged and
    /// counted; the remaining sites still run.
    pub async fn run_hourly_batch(&self, instant: OffsetDateTime) {
        let run_id = run_id("hourly");
        let sites = match self.store.sites().await {
            Ok(sites) => sites,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "site listing failed, skipping hourly batch");
                return;
            }
        };

        for site in sites {
            if let Err(e) = self.aggregator.aggregate_hourly(&site.site_id, instant).await {
                metrics::counter!("scheduler_site_failures_total").increment(1);
                tracing::error!(
                    site = %site.site_id,
                    hour = %instant,
                    run_id = %run_id,
                    error = %e,
                    "hourly aggregation failed, continuing with remaining sites"
                );
            }
        }
    }

    /// Daily aggregation (and anchor scheduling) for every site, with the
    /// same per-site isolation as the hourly batch.
    pub async fn run_daily_batch(&self, day: Date) {
        let run_id = run_id("daily");
        let sites = match self.store.sites().await {
            Ok(sites) => sites,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "site listing failed, skipping daily batch");
                return;
            }
        };

        for site in sites {
            if let Err(e) = self.daily_for_site(&site.site_id, day, &run_id).await {
                metrics::counter!("scheduler_site_failures_total").increment(1);
                tracing::error!(
                    site = %site.site_id,
                    day = %day,
                    run_id = %run_id,
                    error = %e,
                    "daily aggregation failed, continuing with remaining sites"
                );
            }
        }
    }

    async fn daily_for_site(
        &self,
        site_id: &str,
        day: Date,
        run_id: &str,
    ) -> Result<Option<DailyDigest>, AggregateError> {
        let digest = self.aggregator.aggregate_daily(site_id, day).await?;
        if let Some(digest) = &digest {
            self.schedule_anchor(digest, run_id);
        }
        Ok(digest)
    }

    /// Anchor submissions are network-bound, so each one runs as its own
    /// task; a slow adapter never serializes unrelated sites. The delay
    /// gives any dependent artifact publication a head start.
    fn schedule_anchor(&self, digest: &DailyDigest, run_id: &str) {
        let Some(coordinator) = &self.anchor else {
            return;
        };

        let coordinator = coordinator.clone();
        let delay = self.anchor_delay;
        let site_id = digest.site_id.clone();
        let day = digest.day;
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = coordinator.anchor_digest(&site_id, day, &run_id).await {
                tracing::error!(
                    site = %site_id,
                    day = %day,
                    run_id = %run_id,
                    error = %e,
                    "scheduled anchor submission failed"
                );
            }
        });
    }

    async fn hourly_loop(&self) {
        loop {
            let now = OffsetDateTime::now_utc();
            let next = next_hour_boundary(now);
            tokio::time::sleep(until(now, next)).await;
            // The hour that just completed.
            self.fire(Trigger::HourlyBatch {
                instant: next - Duration::hours(1),
            })
            .await;
        }
    }

    async fn daily_loop(&self) {
        loop {
            let now = OffsetDateTime::now_utc();
            let next = next_daily_run(now, self.daily_run_utc);
            tokio::time::sleep(until(now, next)).await;
            let day = next.date().previous_day().unwrap_or(next.date());
            self.fire(Trigger::DailyBatch { day }).await;
        }
    }

    /// Run both periodic loops forever.
    pub async fn run(&self) {
        tracing::info!(daily_run_utc = %self.daily_run_utc, "recompute scheduler started");
        tokio::join!(self.hourly_loop(), self.daily_loop());
    }
}
