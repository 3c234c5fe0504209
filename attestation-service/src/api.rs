use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use ledger_client::domain::DailyDigest;
use ledger_client::LedgerStore;
use serde::Serialize;
use time::macros::format_description;
use time::Date;

use crate::aggregate::{AggregateError, Aggregator};
use crate::anchor::{AnchorCoordinator, AnchorError};
use crate::ingest::{IngestReport, IngestService};
use crate::merkle::Proof;
use crate::normalize::RawReading;
use crate::scheduler::RecomputeScheduler;

#[derive(Clone)]
pub struct ApiState {
    pub ingest: Arc<IngestService>,
    pub store: Arc<dyn LedgerStore>,
    pub aggregator: Arc<Aggregator>,
    pub scheduler: Arc<RecomputeScheduler>,
    pub anchor: Option<Arc<AnchorCoordinator>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/ingest/readings", post(ingest_readings))
        .route("/sites/:site_id/digests/:day", get(get_digest))
        .route("/sites/:site_id/digests/:day/proof/:leaf", get(get_proof))
        .route("/sites/:site_id/digests/:day/recompute", post(recompute_digest))
        .route("/sites/:site_id/digests/:day/confirmation", get(get_confirmation))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: ApiState) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api bind addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

fn parse_day(day: &str) -> Result<Date, StatusCode> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(day, format).map_err(|_| StatusCode::BAD_REQUEST)
}

fn aggregate_status(e: &AggregateError) -> StatusCode {
    match e {
        AggregateError::UnknownSite { .. } => StatusCode::NOT_FOUND,
        AggregateError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn ingest_readings(
    State(state): State<ApiState>,
    Json(payload): Json<Vec<RawReading>>,
) -> Json<IngestReport> {
    metrics::counter!("http_ingest_requests_total").increment(1);
    Json(state.ingest.ingest_batch(payload).await)
}

async fn get_digest(
    State(state): State<ApiState>,
    Path((site_id, day)): Path<(String, String)>,
) -> Result<Json<DailyDigest>, StatusCode> {
    let day = parse_day(&day)?;
    match state.store.daily_digest(&site_id, day).await {
        Ok(Some(digest)) => Ok(Json(digest)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(site = %site_id, day = %day, error = %e, "digest lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn get_proof(
    State(state): State<ApiState>,
    Path((site_id, day, leaf)): Path<(String, String, String)>,
) -> Result<Json<Proof>, StatusCode> {
    let day = parse_day(&day)?;
    match state.aggregator.proof_for(&site_id, day, &leaf).await {
        Ok(Some(proof)) => Ok(Json(proof)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(site = %site_id, day = %day, error = %e, "proof generation failed");
            Err(aggregate_status(&e))
        }
    }
}

async fn recompute_digest(
    State(state): State<ApiState>,
    Path((site_id, day)): Path<(String, String)>,
) -> Result<Json<DailyDigest>, StatusCode> {
    let day = parse_day(&day)?;
    match state.scheduler.recompute(&site_id, day).await {
        Ok(Some(digest)) => Ok(Json(digest)),
        // An empty day is a valid outcome, not a failure.
        Ok(None) => Err(StatusCode::NO_CONTENT),
        Err(e) => {
            tracing::error!(site = %site_id, day = %day, error = %e, "manual recompute failed");
            Err(aggregate_status(&e))
        }
    }
}

#[derive(Serialize)]
struct ConfirmationResponse {
    confirmed: Option<bool>,
}

async fn get_confirmation(
    State(state): State<ApiState>,
    Path((site_id, day)): Path<(String, String)>,
) -> Result<Json<ConfirmationResponse>, StatusCode> {
    let day = parse_day(&day)?;
    let Some(coordinator) = &state.anchor else {
        return Err(StatusCode::NOT_FOUND);
    };

    match coordinator.confirmed(&site_id, day).await {
        Ok(confirmed) => Ok(Json(ConfirmationResponse { confirmed })),
        Err(AnchorError::MissingDigest { .. }) => Err(StatusCode::NOT_FOUND),
        Err(e @ AnchorError::Transport(_)) | Err(e @ AnchorError::NonSuccess { .. }) => {
            tracing::error!(site = %site_id, day = %day, error = %e, "anchor status lookup failed");
            Err(StatusCode::BAD_GATEWAY)
        }
        Err(e) => {
            tracing::error!(site = %site_id, day = %day, error = %e, "anchor status lookup failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
