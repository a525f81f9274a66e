//! Routes for starting ad spy runs, reading their results and managing schedules.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    ad_spy_run::{AdSpyRun, AdSpyRunDetails, RunStatus},
    ad_spy_schedule::{AdSpySchedule, UpsertAdSpySchedule},
};
use serde::{Deserialize, Serialize};
use services::services::ad_spy::{AdSpyService, StartAdSpyRun};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

/// Returned as soon as the run record exists
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct StartAdSpyRunResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
}

/// POST /api/accounts/{account_id}/ad-spy/runs
/// Accept a run and process it in the background
pub async fn start_run(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    axum::Json(payload): axum::Json<StartAdSpyRun>,
) -> Result<ResponseJson<ApiResponse<StartAdSpyRunResponse>>, ApiError> {
    let (run, _handle) = state.ad_spy().start_run(account_id, payload).await?;

    Ok(ResponseJson(ApiResponse::success(StartAdSpyRunResponse {
        run_id: run.id,
        status: run.status,
    })))
}

/// GET /api/accounts/{account_id}/ad-spy/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<ListRunsQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<AdSpyRun>>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let runs = AdSpyService::list_runs(&state.db().pool, account_id, limit).await?;
    Ok(ResponseJson(ApiResponse::success(runs)))
}

/// GET /api/ad-spy/runs/{run_id}
/// Run status with its top performers and their iterations
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<AdSpyRunDetails>>, ApiError> {
    let details = AdSpyService::get_details(&state.db().pool, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;
    Ok(ResponseJson(ApiResponse::success(details)))
}

/// GET /api/accounts/{account_id}/ad-spy/schedule
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Option<AdSpySchedule>>>, ApiError> {
    let schedule = AdSpySchedule::find_by_account_id(&state.db().pool, account_id).await?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

/// PUT /api/accounts/{account_id}/ad-spy/schedule
pub async fn upsert_schedule(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpsertAdSpySchedule>,
) -> Result<ResponseJson<ApiResponse<AdSpySchedule>>, ApiError> {
    let max_window = state.ad_spy().config().max_window_days;
    if !(1..=max_window).contains(&payload.window_days) {
        return Err(ApiError::BadRequest(format!(
            "window_days must be between 1 and {max_window}"
        )));
    }
    if payload.interval_hours < 1 {
        return Err(ApiError::BadRequest(
            "interval_hours must be at least 1".to_string(),
        ));
    }

    let schedule = AdSpySchedule::upsert(&state.db().pool, account_id, &payload).await?;
    tracing::info!(
        account_id = %account_id,
        enabled = schedule.enabled,
        interval_hours = schedule.interval_hours,
        "Updated ad spy schedule"
    );
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

/// POST /api/accounts/{account_id}/ad-spy/schedule/disable
pub async fn disable_schedule(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<AdSpySchedule>>, ApiError> {
    let schedule = AdSpySchedule::set_enabled(&state.db().pool, account_id, false)
        .await?
        .ok_or_else(|| ApiError::NotFound("no ad spy schedule for this account".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .nest(
            "/accounts/{account_id}/ad-spy",
            Router::new()
                .route("/runs", post(start_run).get(list_runs))
                .route("/schedule", get(get_schedule).put(upsert_schedule))
                .route("/schedule/disable", post(disable_schedule)),
        )
        .route("/ad-spy/runs/{run_id}", get(get_run))
}
