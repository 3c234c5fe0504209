use anyhow::Result;
use time::{Date, OffsetDateTime};

use crate::domain::{DailyDigest, HourlySummary, NormalizedRecord, Site};

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Storage boundary for the attestation pipeline.
///
/// Every write is an idempotent upsert keyed by the row's natural identity:
/// (site, ts) for records, (site, hour) and (site, day) for the derived
/// summaries. Components receive the store by injection; nothing in the
/// pipeline holds a global connection.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<()>;

    /// Records for one site with `start <= ts < end`, ordered by ts.
    async fn records_in_range(
        &self,
        site_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<NormalizedRecord>>;

    async fn upsert_hourly(&self, summary: &HourlySummary) -> Result<()>;

    async fn hourly_summary(
        &self,
        site_id: &str,
        hour_utc: OffsetDateTime,
    ) -> Result<Option<HourlySummary>>;

    async fn upsert_daily(&self, digest: &DailyDigest) -> Result<()>;

    async fn daily_digest(&self, site_id: &str, day: Date) -> Result<Option<DailyDigest>>;

    /// Transition the digest's anchor flag false -> true and record the
    /// external references. Returns `false` when the digest was already
    /// anchored; in that case the stored references are left untouched.
    async fn mark_anchored(
        &self,
        site_id: &str,
        day: Date,
        adapter_tx_id: &str,
        chain_tx_hash: &str,
    ) -> Result<bool>;

    async fn site(&self, site_id: &str) -> Result<Option<Site>>;

    async fn sites(&self) -> Result<Vec<Site>>;
}
