use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use attestation_service::{
    aggregate::Aggregator,
    anchor::{AnchorCoordinator, AnchorPolicy, HttpAnchorClient},
    api::{self, ApiState},
    config::AppConfig,
    ingest::IngestService,
    metrics_server, observability,
    scheduler::RecomputeScheduler,
};
use ledger_client::store::PgLedgerStore;
use ledger_client::LedgerStore;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.store.max_connections)
        .connect(&cfg.store.uri)
        .await?;
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));

    let aggregator = Arc::new(Aggregator::new(store.clone()));

    // Anchoring is optional; a missing endpoint with anchoring enabled is a
    // configuration error, not something to retry at runtime.
    let anchor = if cfg.anchor.enabled {
        let endpoint = cfg
            .anchor
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("anchor.enabled is set but anchor.endpoint is missing"))?;
        let client = Arc::new(HttpAnchorClient::new(
            endpoint,
            cfg.anchor.auth_bearer_token.clone(),
        )?);
        Some(Arc::new(AnchorCoordinator::new(
            store.clone(),
            client,
            AnchorPolicy {
                max_retries: cfg.anchor.max_retries,
                retry_backoff: Duration::from_millis(cfg.anchor.retry_backoff_ms),
                retry_non_success: cfg.anchor.retry_non_success,
            },
            cfg.anchor.artifact_uri_template.clone(),
        )))
    } else {
        None
    };

    let scheduler = Arc::new(RecomputeScheduler::new(
        store.clone(),
        aggregator.clone(),
        anchor.clone(),
        Duration::from_millis(cfg.scheduler.anchor_delay_ms),
        cfg.scheduler.daily_run_time()?,
    ));

    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await });
    }

    let state = ApiState {
        ingest: Arc::new(IngestService::new(store.clone())),
        store,
        aggregator,
        scheduler,
        anchor,
    };
    api::serve(&cfg.api.bind_addr, state).await
}
