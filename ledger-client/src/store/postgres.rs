use anyhow::Result;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};

use crate::domain::{DailyDigest, HourlySummary, NormalizedRecord, Site};

use super::LedgerStore;

/// Postgres-backed store. Schema is expected to be applied out-of-band via
/// `sql/schema/*.sql`.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn upsert_record(&self, record: &NormalizedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO normalized_record
                (site_id, ts, irradiance_wm2, temp_c, wind_ms, power_kw, energy_kwh, status, source, row_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (site_id, ts) DO UPDATE SET
                irradiance_wm2 = EXCLUDED.irradiance_wm2,
                temp_c         = EXCLUDED.temp_c,
                wind_ms        = EXCLUDED.wind_ms,
                power_kw       = EXCLUDED.power_kw,
                energy_kwh     = EXCLUDED.energy_kwh,
                status         = EXCLUDED.status,
                source         = EXCLUDED.source,
                row_hash       = EXCLUDED.row_hash
            "#,
        )
        .bind(&record.site_id)
        .bind(record.ts)
        .bind(record.irradiance_wm2)
        .bind(record.temp_c)
        .bind(record.wind_ms)
        .bind(record.power_kw)
        .bind(record.energy_kwh)
        .bind(&record.status)
        .bind(&record.source)
        .bind(&record.row_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn records_in_range(
        &self,
        site_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<NormalizedRecord>> {
        let rows = sqlx::query_as::<_, NormalizedRecord>(
            r#"
            SELECT
                site_id,
                ts,
                irradiance_wm2,
                temp_c,
                wind_ms,
                power_kw,
                energy_kwh,
                status,
                source,
                row_hash
            FROM normalized_record
            WHERE site_id = $1
              AND ts >= $2
              AND ts <  $3
            ORDER BY ts
            "#,
        )
        .bind(site_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn upsert_hourly(&self, summary: &HourlySummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hourly_summary
                (site_id, hour_utc, energy_kwh, max_power_kw, avg_temp_c, avg_irr_wm2, row_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (site_id, hour_utc) DO UPDATE SET
                energy_kwh   = EXCLUDED.energy_kwh,
                max_power_kw = EXCLUDED.max_power_kw,
                avg_temp_c   = EXCLUDED.avg_temp_c,
                avg_irr_wm2  = EXCLUDED.avg_irr_wm2,
                row_count    = EXCLUDED.row_count
            "#,
        )
        .bind(&summary.site_id)
        .bind(summary.hour_utc)
        .bind(summary.energy_kwh)
        .bind(summary.max_power_kw)
        .bind(summary.avg_temp_c)
        .bind(summary.avg_irr_wm2)
        .bind(summary.row_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn hourly_summary(
        &self,
        site_id: &str,
        hour_utc: OffsetDateTime,
    ) -> Result<Option<HourlySummary>> {
        let row = sqlx::query_as::<_, HourlySummary>(
            r#"
            SELECT
                site_id,
                hour_utc,
                energy_kwh,
                max_power_kw,
                avg_temp_c,
                avg_irr_wm2,
                row_count
            FROM hourly_summary
            WHERE site_id = $1
              AND hour_utc = $2
            "#,
        )
        .bind(site_id)
        .bind(hour_utc)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert_daily(&self, digest: &DailyDigest) -> Result<()> {
        // Anchor state is owned by mark_anchored; a recompute never touches it.
        sqlx::query(
            r#"
            INSERT INTO daily_digest
                (site_id, day, energy_kwh, avoided_tco2e, row_count, merkle_root, anchored, adapter_tx_id, chain_tx_hash)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, NULL, NULL)
            ON CONFLICT (site_id, day) DO UPDATE SET
                energy_kwh    = EXCLUDED.energy_kwh,
                avoided_tco2e = EXCLUDED.avoided_tco2e,
                row_count     = EXCLUDED.row_count,
                merkle_root   = EXCLUDED.merkle_root
            "#,
        )
        .bind(&digest.site_id)
        .bind(digest.day)
        .bind(digest.energy_kwh)
        .bind(digest.avoided_tco2e)
        .bind(digest.row_count)
        .bind(&digest.merkle_root)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn daily_digest(&self, site_id: &str, day: Date) -> Result<Option<DailyDigest>> {
        let row = sqlx::query_as::<_, DailyDigest>(
            r#"
            SELECT
                site_id,
                day,
                energy_kwh,
                avoided_tco2e,
                row_count,
                merkle_root,
                anchored,
                adapter_tx_id,
                chain_tx_hash
            FROM daily_digest
            WHERE site_id = $1
              AND day = $2
            "#,
        )
        .bind(site_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn mark_anchored(
        &self,
        site_id: &str,
        day: Date,
        adapter_tx_id: &str,
        chain_tx_hash: &str,
    ) -> Result<bool> {
        // Conditional update: only an unanchored digest transitions, which
        // keeps concurrent submitters from overwriting stored references.
        let result = sqlx::query(
            r#"
            UPDATE daily_digest
            SET anchored = TRUE,
                adapter_tx_id = $3,
                chain_tx_hash = $4
            WHERE site_id = $1
              AND day = $2
              AND NOT anchored
            "#,
        )
        .bind(site_id)
        .bind(day)
        .bind(adapter_tx_id)
        .bind(chain_tx_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn site(&self, site_id: &str) -> Result<Option<Site>> {
        let row = sqlx::query_as::<_, Site>(
            r#"
            SELECT site_id, name, timezone, baseline_kg_per_kwh
            FROM site
            WHERE site_id = $1
            "#,
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn sites(&self) -> Result<Vec<Site>> {
        let rows = sqlx::query_as::<_, Site>(
            r#"
            SELECT site_id, name, timezone, baseline_kg_per_kwh
            FROM site
            ORDER BY site_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
