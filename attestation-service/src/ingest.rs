use std::sync::Arc;

use ledger_client::LedgerStore;
use serde::Serialize;

use crate::normalize::{self, RawReading};
use crate::rowhash;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedReading {
    pub site_id: String,
    pub ts: String,
    pub row_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedReading {
    pub index: usize,
    pub reason: String,
}

/// Batch result: rejected rows never abort the rest of the batch.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub accepted: Vec<AcceptedReading>,
    pub rejected: Vec<RejectedReading>,
}

/// Entry point for the ingestion transports: normalize each raw reading,
/// stamp its row hash and upsert it under (site, ts). Re-delivery of the
/// same instant overwrites.
pub struct IngestService {
    store: Arc<dyn LedgerStore>,
}

impl IngestService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn ingest_batch(&self, readings: Vec<RawReading>) -> IngestReport {
        let mut report = IngestReport::default();

        for (index, raw) in readings.into_iter().enumerate() {
            match normalize::normalize(&raw) {
                Ok(record) => match self.store.upsert_record(&record).await {
                    Ok(()) => {
                        metrics::counter!("ingest_accepted_total").increment(1);
                        report.accepted.push(AcceptedReading {
                            site_id: record.site_id,
                            ts: rowhash::canonical_instant(record.ts),
                            row_hash: record.row_hash,
                        });
                    }
                    Err(e) => {
                        metrics::counter!("ingest_store_errors_total").increment(1);
                        tracing::error!(site = %raw.site_id, ts = %raw.ts, error = %e, "record upsert failed");
                        report.rejected.push(RejectedReading {
                            index,
                            reason: format!("store error: {e}"),
                        });
                    }
                },
                Err(e) => {
                    metrics::counter!("ingest_rejected_total").increment(1);
                    report.rejected.push(RejectedReading {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_client::store::MemoryLedgerStore;
    use time::macros::datetime;

    fn raw(site: &str, ts: &str, energy: Option<f64>) -> RawReading {
        RawReading {
            site_id: site.to_string(),
            ts: ts.to_string(),
            irradiance_wm2: None,
            temp_c: None,
            wind_ms: None,
            power_kw: None,
            energy_kwh: energy,
            status: None,
            source: None,
        }
    }

    #[tokio::test]
    async fn batch_reports_successes_and_failures_separately() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ingest = IngestService::new(store.clone());

        let report = ingest
            .ingest_batch(vec![
                raw("PRJ001", "2024-01-15T10:00:00Z", Some(1.5)),
                raw("", "2024-01-15T10:05:00Z", Some(1.0)),
                raw("PRJ001", "not-a-timestamp", Some(1.0)),
                raw("PRJ001", "2024-01-15T10:10:00Z", Some(f64::NAN)),
                raw("PRJ001", "2024-01-15T10:15:00Z", None),
            ])
            .await;

        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.rejected.len(), 3);
        let rejected_indices: Vec<usize> = report.rejected.iter().map(|r| r.index).collect();
        assert_eq!(rejected_indices, vec![1, 2, 3]);

        // Only the accepted rows reached the store.
        let rows = store
            .records_in_range(
                "PRJ001",
                datetime!(2024-01-15 10:00:00 UTC),
                datetime!(2024-01-15 11:00:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn accepted_rows_expose_the_canonical_instant_and_hash() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ingest = IngestService::new(store);

        let report = ingest
            .ingest_batch(vec![raw("PRJ001", "2024-01-15T10:00:00Z", Some(1.5))])
            .await;

        let accepted = &report.accepted[0];
        assert_eq!(accepted.ts, "2024-01-15T10:00:00.000Z");
        assert_eq!(accepted.row_hash.len(), 64);
    }
}
