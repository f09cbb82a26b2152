//! HTTP API for Caravan.
//!
//! Three surfaces share the router:
//!
//! - **Control API** for the presentation surface: start/stop/list
//!   campaigns, poll stats, fetch a city's identity.
//! - **Telemetry WebSocket** (`GET /ws`): server-to-client JSON events
//!   only; a connecting observer receives a full snapshot first, then
//!   ordered diffs. Clients resync after a disconnect by reconnecting.
//! - **Worker ingestion**: lead/counter/log reports from external
//!   workers. Reports for campaigns that already stopped are accepted
//!   and ignored.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::{debug, info, instrument, warn};

use crate::model::{
    Campaign, ControlResponse, IngestionReport, LeadReport, LogReport, StartRequest, StatsSnapshot,
    StopRequest,
};
use crate::orchestrator::Orchestrator;
use crate::registry::RegistryError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/campaigns/start", post(start_campaign))
        .route("/campaigns/stop", post(stop_campaign))
        .route("/campaigns", get(list_campaigns))
        .route("/stats", get(get_stats))
        .route("/identity/:city", get(get_identity))
        .route("/worker/leads", post(worker_leads))
        .route("/worker/report", post(worker_report))
        .route("/worker/log", post(worker_log))
        .route("/ws", get(telemetry_ws))
        .route("/health", get(health_check))
        .with_state(state)
}

/// POST /campaigns/start - Start a campaign for a provisioned city.
///
/// # Response
///
/// `{"success": true, "campaignId": "both_Delhi_1700000000000"}` on
/// success, or `{"success": false, "error": ...}` with 400 when the city
/// has no identity.
#[instrument(skip(state))]
pub async fn start_campaign(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .start_campaign(&request.city, request.platform, &request.mode)
        .await
    {
        Ok(campaign) => {
            info!(id = %campaign.id, "Campaign start accepted");
            (StatusCode::OK, Json(ControlResponse::started(campaign.id)))
        }
        Err(e) => {
            warn!(city = %request.city, error = %e, "Campaign start rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(ControlResponse::failed(e.to_string())),
            )
        }
    }
}

/// POST /campaigns/stop - Stop a campaign by id.
///
/// A stop for an id that is absent (or already stopping) returns 404 with
/// `{"success": false, "error": "not found"}`; double stops are a normal
/// outcome, not a fault.
#[instrument(skip(state))]
pub async fn stop_campaign(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> impl IntoResponse {
    match state.orchestrator.stop_campaign(&request.campaign_id).await {
        Ok(()) => {
            info!(id = %request.campaign_id, "Campaign stopped");
            (StatusCode::OK, Json(ControlResponse::ok()))
        }
        Err(RegistryError::NotFound(_)) => {
            debug!(id = %request.campaign_id, "Stop for absent campaign");
            (
                StatusCode::NOT_FOUND,
                Json(ControlResponse::failed("not found")),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ControlResponse::failed(e.to_string())),
        ),
    }
}

/// GET /campaigns - All campaigns in insertion order.
pub async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<Campaign>> {
    Json(state.orchestrator.list_campaigns())
}

/// GET /stats - Current rollup snapshot, for the control surface's first
/// paint before its WebSocket connects.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.orchestrator.stats_snapshot())
}

/// GET /identity/:city - Identity the rendering surface must apply to the
/// city's session. 404 for unprovisioned cities, never a silent default.
#[instrument(skip(state))]
pub async fn get_identity(
    State(state): State<AppState>,
    Path(city): Path<String>,
) -> Response {
    match state.orchestrator.identity(&city) {
        Ok(identity) => Json((*identity).clone()).into_response(),
        Err(e) => {
            warn!(city = %city, "Identity requested for unknown city");
            (
                StatusCode::NOT_FOUND,
                Json(ControlResponse::failed(e.to_string())),
            )
                .into_response()
        }
    }
}

/// POST /worker/leads - Per-campaign lead report from a worker.
#[instrument(skip(state))]
pub async fn worker_leads(
    State(state): State<AppState>,
    Json(report): Json<LeadReport>,
) -> impl IntoResponse {
    state
        .orchestrator
        .record_leads(&report.campaign_id, report.count)
        .await;
    StatusCode::ACCEPTED
}

/// POST /worker/report - Campaign-agnostic counter report from a worker.
#[instrument(skip(state))]
pub async fn worker_report(
    State(state): State<AppState>,
    Json(report): Json<IngestionReport>,
) -> impl IntoResponse {
    state.orchestrator.record_ingestion(report.kind, report.amount);
    StatusCode::ACCEPTED
}

/// POST /worker/log - Worker log line, fanned out to observers.
#[instrument(skip(state))]
pub async fn worker_log(
    State(state): State<AppState>,
    Json(report): Json<LogReport>,
) -> impl IntoResponse {
    state.orchestrator.report_log(&report.message);
    StatusCode::ACCEPTED
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /ws - Telemetry push channel.
pub async fn telemetry_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| observer_loop(socket, state.orchestrator))
}

/// Pump one observer's queue into its socket until either side goes away.
///
/// The subscription is created inside the upgrade, so the snapshot the
/// observer receives reflects the registry at connect time. Dropping the
/// handle on any exit path unsubscribes the observer; a stalled socket
/// only ever backs up its own queue.
async fn observer_loop(mut socket: WebSocket, orchestrator: Arc<Orchestrator>) {
    let mut handle = orchestrator.subscribe();
    debug!(observer_id = handle.id(), "Telemetry observer connected");

    loop {
        tokio::select! {
            event = handle.next() => {
                let Some(event) = event else {
                    // Channel drained for shutdown.
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode telemetry event");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Observers are read-only; inbound frames are ignored
                    // but keep the connection's liveness visible.
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    debug!(observer_id = handle.id(), "Telemetry observer disconnected");
}
