use ledger_client::domain::NormalizedRecord;
use time::{OffsetDateTime, UtcOffset};

use crate::normalize::{ENERGY_DP, IRRADIANCE_DP, POWER_DP, TEMP_DP};

/// Canonical instant rendering: ISO-8601 UTC with millisecond precision.
/// This exact shape is part of the hash contract; changing it changes every
/// row hash.
pub(crate) fn canonical_instant(ts: OffsetDateTime) -> String {
    let ts = ts.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.millisecond(),
    )
}

fn fixed(value: Option<f64>, dp: usize) -> String {
    // Absent stays empty: a missing metric and a zero reading must produce
    // different canonical rows.
    match value {
        Some(v) => format!("{v:.dp$}"),
        None => String::new(),
    }
}

/// Delimiter-joined canonical representation of one normalized row.
///
/// Field order: site, instant, energy, power, irradiance, temperature,
/// status. Source and ingestion order never appear, so re-delivery through a
/// different transport hashes identically.
pub fn canonical_row(record: &NormalizedRecord) -> String {
    [
        record.site_id.clone(),
        canonical_instant(record.ts),
        fixed(record.energy_kwh, ENERGY_DP),
        fixed(record.power_kw, POWER_DP),
        fixed(record.irradiance_wm2, IRRADIANCE_DP),
        fixed(record.temp_c, TEMP_DP),
        record.status.clone().unwrap_or_default(),
    ]
    .join("|")
}

/// 256-bit digest of a UTF-8 string, lowercase hex.
pub fn digest_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Content hash of a normalized row: tamper-evidence fingerprint and the
/// idempotency key for storage upserts.
pub fn row_hash(record: &NormalizedRecord) -> String {
    digest_hex(&canonical_row(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record() -> NormalizedRecord {
        NormalizedRecord {
            site_id: "PRJ001".to_string(),
            ts: datetime!(2024-01-15 10:30:00 UTC),
            irradiance_wm2: Some(800.1),
            temp_c: Some(25.7),
            wind_ms: None,
            power_kw: Some(2.346),
            energy_kwh: Some(1.23),
            status: Some("online".to_string()),
            source: Some("mqtt".to_string()),
            row_hash: String::new(),
        }
    }

    #[test]
    fn canonical_instant_has_millisecond_precision() {
        assert_eq!(
            canonical_instant(datetime!(2024-01-15 10:30:00.5 UTC)),
            "2024-01-15T10:30:00.500Z"
        );
        assert_eq!(
            canonical_instant(datetime!(2024-01-15 10:30:00 UTC)),
            "2024-01-15T10:30:00.000Z"
        );
    }

    #[test]
    fn canonical_row_renders_fixed_decimals_and_empty_absents() {
        let mut rec = record();
        rec.power_kw = None;
        rec.status = None;

        assert_eq!(
            canonical_row(&rec),
            "PRJ001|2024-01-15T10:30:00.000Z|1.23||800.1|25.7|"
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let rec = record();
        assert_eq!(row_hash(&rec), row_hash(&rec));
        assert_eq!(row_hash(&rec).len(), 64);
        assert!(row_hash(&rec).chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn absent_metric_hashes_differently_from_zero() {
        let with_zero = NormalizedRecord {
            energy_kwh: Some(0.0),
            ..record()
        };
        let absent = NormalizedRecord {
            energy_kwh: None,
            ..record()
        };
        assert_ne!(row_hash(&with_zero), row_hash(&absent));
    }

    #[test]
    fn source_does_not_affect_hash() {
        let a = NormalizedRecord {
            source: Some("mqtt".to_string()),
            ..record()
        };
        let b = NormalizedRecord {
            source: Some("http-push".to_string()),
            ..record()
        };
        assert_eq!(row_hash(&a), row_hash(&b));
    }
}
