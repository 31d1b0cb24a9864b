//! `/api/v1/collection` handlers: scheduler control, status views and the
//! server-sent event stream.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use lotdb_collector::{
    JobStatus, MakeProgress, MakeRequest, Phase, RestartRequest, StartMakeResult, StartOutcome,
    StatusReport, StopOutcome,
};
use lotdb_core::{Checkpoint, ScopeKey};
use lotdb_db::ResetRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_scheduler_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct StartData {
    outcome: StartOutcome,
    phase: Phase,
}

#[derive(Debug, Serialize)]
pub(super) struct StopData {
    outcome: StopOutcome,
    phase: Phase,
}

#[derive(Debug, Deserialize)]
pub(super) struct StartMultipleRequest {
    searches: Vec<MakeRequest>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResetsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct ResetItem {
    reset_id: Uuid,
    scope: ScopeKey,
    previous: Checkpoint,
    requested_by: String,
    reason: String,
    reset_at: DateTime<Utc>,
}

impl From<ResetRecord> for ResetItem {
    fn from(record: ResetRecord) -> Self {
        Self {
            reset_id: record.id,
            scope: record.scope,
            previous: record.previous,
            requested_by: record.requested_by,
            reason: record.reason,
            reset_at: record.reset_at,
        }
    }
}

fn respond<T: Serialize>(req_id: RequestId, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    })
}

/// GET /api/v1/collection/status
pub(super) async fn get_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<StatusReport>>, ApiError> {
    let report = state
        .reporter
        .status()
        .await
        .map_err(|e| map_scheduler_error(req_id.0.clone(), &e))?;
    Ok(respond(req_id, report))
}

/// GET /api/v1/collection/jobs
pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<JobStatus>>>, ApiError> {
    let jobs = state
        .reporter
        .jobs()
        .await
        .map_err(|e| map_scheduler_error(req_id.0.clone(), &e))?;
    Ok(respond(req_id, jobs))
}

/// GET /api/v1/collection/vehicle-progress
pub(super) async fn list_vehicle_progress(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<MakeProgress>>>, ApiError> {
    let progress = state
        .reporter
        .vehicle_progress()
        .await
        .map_err(|e| map_scheduler_error(req_id.0.clone(), &e))?;
    Ok(respond(req_id, progress))
}

/// GET /api/v1/collection/resets: audit log of checkpoint resets.
pub(super) async fn list_resets(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ResetsQuery>,
) -> Result<Json<ApiResponse<Vec<ResetItem>>>, ApiError> {
    let resets = state
        .scheduler
        .store()
        .list_resets(normalize_limit(query.limit))
        .await
        .map_err(|e| map_scheduler_error(req_id.0.clone(), &e.into()))?;
    Ok(respond(req_id, resets.into_iter().map(ResetItem::from).collect()))
}

/// GET /api/v1/collection/events
///
/// Each event is sent with its `type` tag as the SSE event name. A client
/// that falls behind the broadcast buffer receives a `lagged` event with the
/// number of events it missed.
pub(super) async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.scheduler.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode status event");
                    }
                },
                Err(RecvError::Lagged(missed)) => {
                    let sse = Event::default().event("lagged").data(missed.to_string());
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// POST /api/v1/collection/start
pub(super) async fn start(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<StartData>> {
    let outcome = state.scheduler.start();
    tracing::info!(?outcome, "start requested");
    respond(
        req_id,
        StartData {
            outcome,
            phase: state.scheduler.phase(),
        },
    )
}

/// POST /api/v1/collection/stop
pub(super) async fn stop(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<StopData>> {
    let outcome = state.scheduler.stop();
    tracing::info!(?outcome, "stop requested");
    respond(
        req_id,
        StopData {
            outcome,
            phase: state.scheduler.phase(),
        },
    )
}

/// POST /api/v1/collection/start-make
pub(super) async fn start_make(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<MakeRequest>,
) -> Result<Json<ApiResponse<StartMakeResult>>, ApiError> {
    let result = state
        .scheduler
        .start_make(&body)
        .await
        .map_err(|e| map_scheduler_error(req_id.0.clone(), &e))?;
    Ok(respond(req_id, result))
}

/// POST /api/v1/collection/start-multiple
pub(super) async fn start_multiple(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<StartMultipleRequest>,
) -> Result<Json<ApiResponse<StartMakeResult>>, ApiError> {
    let result = state
        .scheduler
        .start_multiple(&body.searches)
        .await
        .map_err(|e| map_scheduler_error(req_id.0.clone(), &e))?;
    Ok(respond(req_id, result))
}

/// POST /api/v1/collection/restart-make
pub(super) async fn restart_make(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<RestartRequest>,
) -> Result<Json<ApiResponse<ResetItem>>, ApiError> {
    let reset = state
        .scheduler
        .restart_make(&body)
        .await
        .map_err(|e| map_scheduler_error(req_id.0.clone(), &e))?;
    tracing::info!(
        scope = %reset.scope,
        requested_by = %reset.requested_by,
        "checkpoint reset via api"
    );
    Ok(respond(req_id, ResetItem::from(reset)))
}
