//! Clearance, matching, overrides and notes

use atlas_core::Cents;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

use super::{actor_from, error_response};

/// The clearance feed: commissions that need human attention
#[utoipa::path(
    get,
    path = "/commissions/clearance",
    tag = "Commissions",
    responses(
        (status = 200, description = "Commissions without contract or consultant")
    )
)]
pub async fn get_clearance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let commissions = state.db.get_clearance().await.map_err(error_response)?;
    Ok(Json(commissions))
}

/// Clearance counters for the dashboard
#[utoipa::path(
    get,
    path = "/commissions/clearance/counts",
    tag = "Commissions",
    responses(
        (status = 200, description = "Unmatched and missing-consultant counts")
    )
)]
pub async fn get_clearance_counts(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let counts = state.db.clearance_counts().await.map_err(error_response)?;
    Ok(Json(counts))
}

/// Trigger the auto-matcher
#[derive(Deserialize, ToSchema)]
pub struct AutoMatchRequest {
    /// Restrict to one batch; omitted means all auto-matchable rows
    pub batch_id: Option<i64>,
}

/// Re-run auto-matching
#[utoipa::path(
    post,
    path = "/commissions/match",
    tag = "Commissions",
    request_body = AutoMatchRequest,
    responses(
        (status = 200, description = "Number of rows whose verdict changed")
    )
)]
pub async fn auto_match(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AutoMatchRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    let changed = state
        .db
        .auto_match(request.batch_id, &actor)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "changed": changed })))
}

/// Manual contract/consultant assignment
#[derive(Deserialize, ToSchema)]
pub struct ManualMatchRequest {
    pub contract_id: Option<i64>,
    pub consultant_id: Option<i64>,
}

/// Manually assign a contract and/or consultant
#[utoipa::path(
    post,
    path = "/commissions/{id}/match",
    tag = "Commissions",
    params(("id" = i64, Path, description = "Commission id")),
    request_body = ManualMatchRequest,
    responses(
        (status = 200, description = "Assignment stored"),
        (status = 409, description = "Settlement already frozen")
    )
)]
pub async fn manual_match(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ManualMatchRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    state
        .db
        .assign_contract(id, request.contract_id, request.consultant_id, &actor)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Mark a commission as never-to-be-settled
#[utoipa::path(
    post,
    path = "/commissions/{id}/ignore",
    tag = "Commissions",
    params(("id" = i64, Path, description = "Commission id")),
    responses(
        (status = 204, description = "Commission ignored")
    )
)]
pub async fn ignore_commission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    state
        .db
        .ignore_commission(id, &actor)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Back-office amount correction
#[derive(Deserialize, ToSchema)]
pub struct OverrideRequest {
    /// Corrected amount in cents
    pub amount_cents: i64,
    pub reason: String,
}

/// Override a commission amount
#[utoipa::path(
    post,
    path = "/commissions/{id}/override",
    tag = "Commissions",
    params(("id" = i64, Path, description = "Commission id")),
    request_body = OverrideRequest,
    responses(
        (status = 204, description = "Override stored"),
        (status = 409, description = "Settlement already frozen")
    )
)]
pub async fn set_override(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<OverrideRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    state
        .db
        .set_override(id, Cents(request.amount_cents), &request.reason, &actor)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove an amount override
#[utoipa::path(
    delete,
    path = "/commissions/{id}/override",
    tag = "Commissions",
    params(("id" = i64, Path, description = "Commission id")),
    responses(
        (status = 204, description = "Override removed")
    )
)]
pub async fn reset_override(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    state
        .db
        .reset_override(id, &actor)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Free-form note on a commission
#[derive(Deserialize, ToSchema)]
pub struct NoteRequest {
    pub note: Option<String>,
}

/// Set or clear the note
#[utoipa::path(
    put,
    path = "/commissions/{id}/note",
    tag = "Commissions",
    params(("id" = i64, Path, description = "Commission id")),
    request_body = NoteRequest,
    responses(
        (status = 204, description = "Note stored")
    )
)]
pub async fn set_note(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<NoteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    state
        .db
        .set_note(id, request.note.as_deref(), &actor)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Audit log query parameters
#[derive(Deserialize, ToSchema)]
pub struct AuditParams {
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub limit: Option<i64>,
}

/// Read the audit trail
#[utoipa::path(
    get,
    path = "/audit",
    tag = "Commissions",
    responses(
        (status = 200, description = "Audit entries, newest first")
    )
)]
pub async fn get_audit_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entries = state
        .db
        .get_audit_log(
            params.entity_type.as_deref(),
            params.entity_id,
            params.limit.unwrap_or(100),
        )
        .await
        .map_err(error_response)?;
    Ok(Json(entries))
}
