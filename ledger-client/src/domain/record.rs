use time::OffsetDateTime;

/// One normalized telemetry row, keyed by (site_id, ts).
///
/// `row_hash` is computed over the normalized metric values and status only;
/// `source` records provenance but never participates in the hash.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct NormalizedRecord {
    pub site_id: String,
    pub ts: OffsetDateTime,
    pub irradiance_wm2: Option<f64>,
    pub temp_c: Option<f64>,
    pub wind_ms: Option<f64>,
    pub power_kw: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub row_hash: String,
}
