use std::collections::HashMap;

use anyhow::Result;
use time::{Date, OffsetDateTime};
use tokio::sync::RwLock;

use crate::domain::{DailyDigest, HourlySummary, NormalizedRecord, Site};

use super::LedgerStore;

#[derive(Default)]
struct Inner {
    records: HashMap<(String, OffsetDateTime), NormalizedRecord>,
    hourly: HashMap<(String, OffsetDateTime), HourlySummary>,
    daily: HashMap<(String, Date), DailyDigest>,
    sites: HashMap<String, Site>,
}

/// In-memory store with the same upsert semantics as the Postgres
/// implementation. Used by tests and for running the service without a
/// database.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_site(&self, site: Site) {
        let mut inner = self.inner.write().await;
        inner.sites.insert(site.site_id.clone(), site);
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .records
            .insert((record.site_id.clone(), record.ts), record.clone());
        Ok(())
    }

    async fn records_in_range(
        &self,
        site_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<NormalizedRecord>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<NormalizedRecord> = inner
            .records
            .values()
            .filter(|r| r.site_id == site_id && r.ts >= start && r.ts < end)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.ts);
        Ok(rows)
    }

    async fn upsert_hourly(&self, summary: &HourlySummary) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .hourly
            .insert((summary.site_id.clone(), summary.hour_utc), summary.clone());
        Ok(())
    }

    async fn hourly_summary(
        &self,
        site_id: &str,
        hour_utc: OffsetDateTime,
    ) -> Result<Option<HourlySummary>> {
        let inner = self.inner.read().await;
        Ok(inner.hourly.get(&(site_id.to_string(), hour_utc)).cloned())
    }

    async fn upsert_daily(&self, digest: &DailyDigest) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (digest.site_id.clone(), digest.day);

        // Anchor state survives recomputation, matching the Postgres upsert.
        let mut next = digest.clone();
        if let Some(existing) = inner.daily.get(&key) {
            next.anchored = existing.anchored;
            next.adapter_tx_id = existing.adapter_tx_id.clone();
            next.chain_tx_hash = existing.chain_tx_hash.clone();
        } else {
            next.anchored = false;
            next.adapter_tx_id = None;
            next.chain_tx_hash = None;
        }
        inner.daily.insert(key, next);
        Ok(())
    }

    async fn daily_digest(&self, site_id: &str, day: Date) -> Result<Option<DailyDigest>> {
        let inner = self.inner.read().await;
        Ok(inner.daily.get(&(site_id.to_string(), day)).cloned())
    }

    async fn mark_anchored(
        &self,
        site_id: &str,
        day: Date,
        adapter_tx_id: &str,
        chain_tx_hash: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.daily.get_mut(&(site_id.to_string(), day)) {
            Some(digest) if !digest.anchored => {
                digest.anchored = true;
                digest.adapter_tx_id = Some(adapter_tx_id.to_string());
                digest.chain_tx_hash = Some(chain_tx_hash.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn site(&self, site_id: &str) -> Result<Option<Site>> {
        let inner = self.inner.read().await;
        Ok(inner.sites.get(site_id).cloned())
    }

    async fn sites(&self) -> Result<Vec<Site>> {
        let inner = self.inner.read().await;
        let mut sites: Vec<Site> = inner.sites.values().cloned().collect();
        sites.sort_by(|a, b| a.site_id.cmp(&b.site_id));
        Ok(sites)
    }
}
