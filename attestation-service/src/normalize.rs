use ledger_client::domain::NormalizedRecord;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::rowhash;

/// Raw reading as delivered by the ingestion transports. Shape-valid JSON,
/// but values are untrusted until normalized.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReading {
    pub site_id: String,
    /// ISO-8601 UTC instant, e.g. "2024-01-15T10:30:00Z".
    pub ts: String,
    pub irradiance_wm2: Option<f64>,
    pub temp_c: Option<f64>,
    pub wind_ms: Option<f64>,
    pub power_kw: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub status: Option<String>,
    pub source: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("site id must not be empty")]
    EmptySiteId,
    #[error("unparseable instant {0:?}")]
    BadInstant(String),
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
}

// Fixed decimal precision per metric. These feed both rounding and the
// canonical hash rendering, so they are part of the integrity contract.
pub(crate) const POWER_DP: usize = 3;
pub(crate) const ENERGY_DP: usize = 2;
pub(crate) const TEMP_DP: usize = 1;
pub(crate) const IRRADIANCE_DP: usize = 1;
// Wind shares temperature's precision.
pub(crate) const WIND_DP: usize = TEMP_DP;

// Physically plausible ranges; values outside are clamped, not rejected.
const IRRADIANCE_WM2: (f64, f64) = (0.0, 2000.0);
const TEMP_C: (f64, f64) = (-50.0, 80.0);
const WIND_MS: (f64, f64) = (0.0, 100.0);
const POWER_KW: (f64, f64) = (0.0, 10_000.0);
const ENERGY_KWH: (f64, f64) = (0.0, 1000.0);

fn round_dp(value: f64, dp: usize) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}

fn normalize_metric(
    value: Option<f64>,
    field: &'static str,
    range: (f64, f64),
    dp: usize,
) -> Result<Option<f64>, NormalizeError> {
    match value {
        None => Ok(None),
        Some(v) if !v.is_finite() => Err(NormalizeError::NonFinite { field }),
        Some(v) => Ok(Some(round_dp(v.clamp(range.0, range.1), dp))),
    }
}

/// Validate, clamp and round one raw reading, and stamp its row hash.
pub fn normalize(raw: &RawReading) -> Result<NormalizedRecord, NormalizeError> {
    if raw.site_id.trim().is_empty() {
        return Err(NormalizeError::EmptySiteId);
    }

    let ts = OffsetDateTime::parse(&raw.ts, &Rfc3339)
        .map_err(|_| NormalizeError::BadInstant(raw.ts.clone()))?
        .to_offset(UtcOffset::UTC);

    let mut record = NormalizedRecord {
        site_id: raw.site_id.clone(),
        ts,
        irradiance_wm2: normalize_metric(raw.irradiance_wm2, "irradiance_wm2", IRRADIANCE_WM2, IRRADIANCE_DP)?,
        temp_c: normalize_metric(raw.temp_c, "temp_c", TEMP_C, TEMP_DP)?,
        wind_ms: normalize_metric(raw.wind_ms, "wind_ms", WIND_MS, WIND_DP)?,
        power_kw: normalize_metric(raw.power_kw, "power_kw", POWER_KW, POWER_DP)?,
        energy_kwh: normalize_metric(raw.energy_kwh, "energy_kwh", ENERGY_KWH, ENERGY_DP)?,
        status: raw.status.clone(),
        source: raw.source.clone(),
        row_hash: String::new(),
    };
    record.row_hash = rowhash::row_hash(&record);

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawReading {
        RawReading {
            site_id: "PRJ001".to_string(),
            ts: "2024-01-15T10:30:00Z".to_string(),
            irradiance_wm2: None,
            temp_c: None,
            wind_ms: None,
            power_kw: None,
            energy_kwh: None,
            status: None,
            source: None,
        }
    }

    #[test]
    fn rounds_each_metric_to_its_precision() {
        let rec = normalize(&RawReading {
            energy_kwh: Some(1.234567),
            power_kw: Some(2.345678),
            irradiance_wm2: Some(800.123456),
            temp_c: Some(25.678901),
            wind_ms: Some(3.14159),
            ..raw()
        })
        .unwrap();

        assert_eq!(rec.energy_kwh, Some(1.23));
        assert_eq!(rec.power_kw, Some(2.346));
        assert_eq!(rec.irradiance_wm2, Some(800.1));
        assert_eq!(rec.temp_c, Some(25.7));
        assert_eq!(rec.wind_ms, Some(3.1));
    }

    #[test]
    fn clamps_out_of_range_values() {
        let rec = normalize(&RawReading {
            irradiance_wm2: Some(2500.0),
            temp_c: Some(-80.0),
            wind_ms: Some(140.0),
            power_kw: Some(-5.0),
            energy_kwh: Some(1500.0),
            ..raw()
        })
        .unwrap();

        assert_eq!(rec.irradiance_wm2, Some(2000.0));
        assert_eq!(rec.temp_c, Some(-50.0));
        assert_eq!(rec.wind_ms, Some(100.0));
        assert_eq!(rec.power_kw, Some(0.0));
        assert_eq!(rec.energy_kwh, Some(1000.0));
    }

    #[test]
    fn absent_metrics_stay_absent() {
        let rec = normalize(&raw()).unwrap();
        assert_eq!(rec.irradiance_wm2, None);
        assert_eq!(rec.temp_c, None);
        assert_eq!(rec.wind_ms, None);
        assert_eq!(rec.power_kw, None);
        assert_eq!(rec.energy_kwh, None);
    }

    #[test]
    fn rejects_empty_site_id() {
        let res = normalize(&RawReading {
            site_id: "  ".to_string(),
            ..raw()
        });
        assert!(matches!(res, Err(NormalizeError::EmptySiteId)));
    }

    #[test]
    fn rejects_unparseable_instant() {
        let res = normalize(&RawReading {
            ts: "15/01/2024 10:30".to_string(),
            ..raw()
        });
        assert!(matches!(res, Err(NormalizeError::BadInstant(_))));
    }

    #[test]
    fn rejects_non_finite_values_before_clamping() {
        let res = normalize(&RawReading {
            power_kw: Some(f64::NAN),
            ..raw()
        });
        assert!(matches!(
            res,
            Err(NormalizeError::NonFinite { field: "power_kw" })
        ));

        let res = normalize(&RawReading {
            energy_kwh: Some(f64::INFINITY),
            ..raw()
        });
        assert!(matches!(
            res,
            Err(NormalizeError::NonFinite { field: "energy_kwh" })
        ));
    }

    #[test]
    fn offset_instants_normalize_to_utc() {
        let rec = normalize(&RawReading {
            ts: "2024-01-15T12:30:00+02:00".to_string(),
            energy_kwh: Some(1.0),
            ..raw()
        })
        .unwrap();

        let utc = normalize(&RawReading {
            ts: "2024-01-15T10:30:00Z".to_string(),
            energy_kwh: Some(1.0),
            ..raw()
        })
        .unwrap();

        assert_eq!(rec.ts, utc.ts);
        assert_eq!(rec.row_hash, utc.row_hash);
    }
}
