//! Settlement generation and status machine

use atlas_commission::model::SettlementStatus;
use atlas_core::Month;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

use super::{actor_from, error_response};

fn parse_month(raw: &str) -> Result<Month, (StatusCode, String)> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid month '{raw}'")))
}

/// Settlement listing parameters
#[derive(Deserialize, ToSchema)]
pub struct SettlementParams {
    /// Month key `YYYY-MM`; omitted lists all months
    pub month: Option<String>,
}

/// Dashboard month parameters
#[derive(Deserialize, ToSchema)]
pub struct MonthParams {
    /// Month key `YYYY-MM`
    pub month: String,
}

/// Month KPIs for the dashboard
#[utoipa::path(
    get,
    path = "/dashboard/summary",
    tag = "Settlements",
    responses(
        (status = 200, description = "Gross, shares and matching counters for the month")
    )
)]
pub async fn month_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MonthParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let month = parse_month(&params.month)?;
    let summary = state
        .db
        .month_summary(month)
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

/// List settlements (all revisions)
#[utoipa::path(
    get,
    path = "/settlements",
    tag = "Settlements",
    responses(
        (status = 200, description = "Settlements ordered by month, employee, revision")
    )
)]
pub async fn list_settlements(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SettlementParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let month = params.month.as_deref().map(parse_month).transpose()?;
    let settlements = state
        .db
        .get_settlements(month)
        .await
        .map_err(error_response)?;
    Ok(Json(settlements))
}

/// Request to (re)generate a month
#[derive(Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// Month key `YYYY-MM`
    pub month: String,
}

/// Generate the month's settlements
#[utoipa::path(
    post,
    path = "/settlements/generate",
    tag = "Settlements",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Settlements written, one revision each")
    )
)]
pub async fn generate_settlements(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let month = parse_month(&request.month)?;
    let actor = actor_from(&headers);
    let written = state
        .db
        .generate_settlements(month, &actor)
        .await
        .map_err(error_response)?;
    Ok(Json(written))
}

/// Status transition request
#[derive(Deserialize, ToSchema)]
pub struct StatusRequest {
    /// Target status: draft, reviewed, released or paid
    pub status: String,
}

/// Move a settlement through the status machine
#[utoipa::path(
    put,
    path = "/settlements/{id}/status",
    tag = "Settlements",
    params(("id" = i64, Path, description = "Settlement id")),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Settlement after the transition"),
        (status = 409, description = "Transition not allowed")
    )
)]
pub async fn update_settlement_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<StatusRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let to = SettlementStatus::parse(&request.status).ok_or((
        StatusCode::BAD_REQUEST,
        format!("unknown settlement status '{}'", request.status),
    ))?;
    let actor = actor_from(&headers);
    let settlement = state
        .db
        .update_settlement_status(id, to, &actor)
        .await
        .map_err(error_response)?;
    Ok(Json(settlement))
}

/// Lock request
#[derive(Deserialize, ToSchema)]
pub struct LockRequest {
    pub locked: bool,
}

/// Lock or unlock a settlement
#[utoipa::path(
    put,
    path = "/settlements/{id}/lock",
    tag = "Settlements",
    params(("id" = i64, Path, description = "Settlement id")),
    request_body = LockRequest,
    responses(
        (status = 204, description = "Lock state stored")
    )
)]
pub async fn set_settlement_locked(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<LockRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    state
        .db
        .set_settlement_locked(id, request.locked, &actor)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
