use std::sync::Arc;

use ledger_client::domain::{DailyDigest, HourlySummary};
use ledger_client::LedgerStore;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::carbon;
use crate::locks::KeyedLocks;
use crate::merkle::{MerkleTree, Proof};

#[derive(thiserror::Error, Debug)]
pub enum AggregateError {
    /// The site is absent from master data. Distinct from an empty period:
    /// this is a configuration defect, not missing telemetry.
    #[error("unknown site {site_id}")]
    UnknownSite { site_id: String },
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// UTC hour window containing `instant`: [start, start + 1h).
pub(crate) fn hour_window(instant: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    let utc = instant.to_offset(UtcOffset::UTC);
    let start = utc
        - Duration::minutes(utc.minute() as i64)
        - Duration::seconds(utc.second() as i64)
        - Duration::nanoseconds(utc.nanosecond() as i64);
    (start, start + Duration::hours(1))
}

/// UTC calendar day window: [midnight, next midnight).
pub(crate) fn day_window(day: Date) -> (OffsetDateTime, OffsetDateTime) {
    let start = day.midnight().assume_utc();
    (start, start + Duration::days(1))
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> f64 {
    values.flatten().sum()
}

fn max_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| match acc {
        Some(m) => Some(f64::max(m, v)),
        None => Some(v),
    })
}

fn avg_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (count, total) = values
        .flatten()
        .fold((0u32, 0.0), |(c, t), v| (c + 1, t + v));
    if count == 0 {
        None
    } else {
        Some(total / f64::from(count))
    }
}

/// Recomputes period summaries from the normalized record set.
///
/// Aggregation is pure over the fetched rows and the final write is an
/// idempotent upsert, so overlapping runs for the same (site, period) are
/// safe; the keyed lock only avoids wasted duplicate computation.
pub struct Aggregator {
    store: Arc<dyn LedgerStore>,
    locks: KeyedLocks,
}

impl Aggregator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Summarize the UTC hour containing `instant` for one site.
    /// An empty window yields `Ok(None)` and writes nothing.
    pub async fn aggregate_hourly(
        &self,
        site_id: &str,
        instant: OffsetDateTime,
    ) -> Result<Option<HourlySummary>, AggregateError> {
        let (start, end) = hour_window(instant);
        let _guard = self.locks.acquire(&format!("hour:{site_id}:{start}")).await;

        let records = self
            .store
            .records_in_range(site_id, start, end)
            .await
            .map_err(AggregateError::Store)?;
        if records.is_empty() {
            return Ok(None);
        }

        let summary = HourlySummary {
            site_id: site_id.to_string(),
            hour_utc: start,
            energy_kwh: sum_present(records.iter().map(|r| r.energy_kwh)),
            max_power_kw: max_present(records.iter().map(|r| r.power_kw)),
            avg_temp_c: avg_present(records.iter().map(|r| r.temp_c)),
            avg_irr_wm2: avg_present(records.iter().map(|r| r.irradiance_wm2)),
            row_count: records.len() as i64,
        };

        self.store
            .upsert_hourly(&summary)
            .await
            .map_err(AggregateError::Store)?;
        metrics::counter!("hourly_aggregations_total").increment(1);

        Ok(Some(summary))
    }

    /// Build the daily digest for one site: energy total, Merkle root over
    /// the day's row hashes and avoided emissions against the site baseline.
    /// An empty day yields `Ok(None)`; an unknown site is an error.
    pub async fn aggregate_daily(
        &self,
        site_id: &str,
        day: Date,
    ) -> Result<Option<DailyDigest>, AggregateError> {
        let site = self
            .store
            .site(site_id)
            .await
            .map_err(AggregateError::Store)?
            .ok_or_else(|| AggregateError::UnknownSite {
                site_id: site_id.to_string(),
            })?;

        let (start, end) = day_window(day);
        let _guard = self.locks.acquire(&format!("day:{site_id}:{day}")).await;

        let records = self
            .store
            .records_in_range(site_id, start, end)
            .await
            .map_err(AggregateError::Store)?;
        let leaves: Vec<String> = records.iter().map(|r| r.row_hash.clone()).collect();
        let Some(tree) = MerkleTree::build(leaves) else {
            return Ok(None);
        };

        let energy_kwh = sum_present(records.iter().map(|r| r.energy_kwh));
        let digest = DailyDigest {
            site_id: site_id.to_string(),
            day,
            energy_kwh,
            avoided_tco2e: carbon::avoided_tco2e(energy_kwh, site.baseline_kg_per_kwh),
            row_count: records.len() as i64,
            merkle_root: tree.root().to_string(),
            anchored: false,
            adapter_tx_id: None,
            chain_tx_hash: None,
        };

        self.store
            .upsert_daily(&digest)
            .await
            .map_err(AggregateError::Store)?;
        metrics::counter!("daily_aggregations_total").increment(1);
        tracing::info!(
            site = site_id,
            day = %day,
            rows = digest.row_count,
            root = %digest.merkle_root,
            "daily digest recomputed"
        );

        Ok(Some(digest))
    }

    /// Inclusion proof for one row hash against the day's current record
    /// set. The tree is rebuilt per call; only roots are persisted.
    pub async fn proof_for(
        &self,
        site_id: &str,
        day: Date,
        leaf: &str,
    ) -> Result<Option<Proof>, AggregateError> {
        let (start, end) = day_window(day);
        let records = self
            .store
            .records_in_range(site_id, start, end)
            .await
            .map_err(AggregateError::Store)?;

        let leaves: Vec<String> = records.iter().map(|r| r.row_hash.clone()).collect();
        Ok(MerkleTree::build(leaves).map(|tree| tree.prove(leaf)))
    }
}
