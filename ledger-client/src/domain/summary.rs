use serde::Serialize;
use time::{Date, OffsetDateTime};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HourlySummary {
    pub site_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub hour_utc: OffsetDateTime,
    #[serde(rename = "energyKWh")]
    pub energy_kwh: f64,
    pub max_power_kw: Option<f64>,
    pub avg_temp_c: Option<f64>,
    pub avg_irr_wm2: Option<f64>,
    pub row_count: i64,
}

/// The persisted daily attestation record for one site.
///
/// Recomputing a digest from an unchanged set of underlying records must
/// reproduce `merkle_root` byte-for-byte. `anchored` only ever transitions
/// false -> true; the external references are written exactly once.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyDigest {
    pub site_id: String,
    pub day: Date,
    #[serde(rename = "energyKWh")]
    pub energy_kwh: f64,
    #[serde(rename = "avoidedTCO2e")]
    pub avoided_tco2e: f64,
    pub row_count: i64,
    pub merkle_root: String,
    pub anchored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_tx_hash: Option<String>,
}
