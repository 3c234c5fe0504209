/// Site master data. Read-only as far as the pipeline is concerned;
/// maintained through administrative configuration.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Site {
    pub site_id: String,
    pub name: String,
    pub timezone: String,
    /// Baseline grid emission factor, kg CO2 per kWh.
    pub baseline_kg_per_kwh: f64,
}
