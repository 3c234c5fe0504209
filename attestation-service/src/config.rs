use serde::Deserialize;
use std::fs;
use time::macros::format_description;
use time::Time;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub uri: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub auth_bearer_token: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Whether non-success adapter responses are retried like transport
    /// failures (true) or treated as terminal (false).
    #[serde(default = "default_retry_non_success")]
    pub retry_non_success: bool,
    /// Optional published-artifact URI with `{site}`/`{day}` placeholders.
    pub artifact_uri_template: Option<String>,
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_retry_non_success() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Daily aggregation time, "HH:MM" UTC.
    pub daily_run_utc: String,
    /// Delay between a finished daily aggregation and its anchor
    /// submission.
    #[serde(default)]
    pub anchor_delay_ms: u64,
}

impl SchedulerConfig {
    pub fn daily_run_time(&self) -> anyhow::Result<Time> {
        let format = format_description!("[hour]:[minute]");
        Time::parse(&self.daily_run_utc, format)
            .map_err(|e| anyhow::anyhow!("invalid scheduler.daily_run_utc {:?}: {e}", self.daily_run_utc))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    pub anchor: AnchorConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ATTESTATION_CONFIG").unwrap_or_else(|_| "attestation-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }
}
