//! Rate models and employee rate overrides
//!
//! Rate edits carry a cutoff date; the response is a `RecalcSummary` with
//! the counts of recomputed splits and regenerated settlements.

use atlas_commission::model::{CommissionModel, TlBasis};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

use super::{actor_from, error_response};

/// List rate model versions
#[utoipa::path(
    get,
    path = "/models",
    tag = "Rate models",
    responses(
        (status = 200, description = "All model versions, lineage-ordered")
    )
)]
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let models = state.db.get_models().await.map_err(error_response)?;
    Ok(Json(models))
}

/// New rate model
#[derive(Deserialize, ToSchema)]
pub struct CreateModelRequest {
    pub name: String,
    /// Consultant share in percent of gross
    pub commission_rate: f64,
    pub tl_rate: Option<f64>,
    /// `berater_anteil` or `brutto`
    pub tl_basis: Option<String>,
    pub effective_from: NaiveDate,
}

/// Create a rate model
#[utoipa::path(
    post,
    path = "/models",
    tag = "Rate models",
    request_body = CreateModelRequest,
    responses(
        (status = 200, description = "Created model id")
    )
)]
pub async fn create_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateModelRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tl_basis = parse_tl_basis(request.tl_basis.as_deref())?;
    let actor = actor_from(&headers);
    let model = CommissionModel {
        id: 0,
        name: request.name,
        commission_rate: request.commission_rate,
        tl_rate: request.tl_rate,
        tl_basis,
        effective_from: request.effective_from,
        active: true,
    };
    let id = state
        .db
        .create_model(&model, &actor)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "id": id })))
}

/// Rate edit with cutoff date
#[derive(Deserialize, ToSchema)]
pub struct RateChangeRequest {
    pub commission_rate: f64,
    pub tl_rate: Option<f64>,
    /// `berater_anteil` or `brutto`
    pub tl_basis: Option<String>,
    /// Cutoff: splits and settlements from this date on are recomputed
    pub effective_from: NaiveDate,
}

/// Edit a model's rates from a cutoff date
#[utoipa::path(
    put,
    path = "/models/{id}/rate",
    tag = "Rate models",
    params(("id" = i64, Path, description = "Model version id")),
    request_body = RateChangeRequest,
    responses(
        (status = 200, description = "Recalculation summary")
    )
)]
pub async fn update_model_rate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<RateChangeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tl_basis = parse_tl_basis(request.tl_basis.as_deref())?;
    let actor = actor_from(&headers);
    let summary = state
        .db
        .update_model_rate(
            id,
            request.commission_rate,
            request.tl_rate,
            tl_basis,
            request.effective_from,
            &actor,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

/// List employees
#[utoipa::path(
    get,
    path = "/employees",
    tag = "Rate models",
    responses(
        (status = 200, description = "All employees")
    )
)]
pub async fn list_employees(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let employees = state.db.get_employees().await.map_err(error_response)?;
    Ok(Json(employees))
}

/// Employee-level rate overrides with cutoff date
#[derive(Deserialize, ToSchema)]
pub struct EmployeeRatesRequest {
    pub commission_rate_override: Option<f64>,
    pub tl_override_rate: Option<f64>,
    /// `berater_anteil` or `brutto`
    pub tl_override_basis: Option<String>,
    pub effective_from: NaiveDate,
}

/// Change an employee's rate overrides
#[utoipa::path(
    put,
    path = "/employees/{id}/rates",
    tag = "Rate models",
    params(("id" = i64, Path, description = "Employee id")),
    request_body = EmployeeRatesRequest,
    responses(
        (status = 200, description = "Recalculation summary")
    )
)]
pub async fn update_employee_rates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<EmployeeRatesRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tl_basis = parse_tl_basis(request.tl_override_basis.as_deref())?;
    let actor = actor_from(&headers);
    let summary = state
        .db
        .update_employee_rates(
            id,
            request.commission_rate_override,
            request.tl_override_rate,
            tl_basis,
            request.effective_from,
            &actor,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

fn parse_tl_basis(raw: Option<&str>) -> Result<Option<TlBasis>, (StatusCode, String)> {
    match raw {
        None => Ok(None),
        Some(value) => TlBasis::parse(value).map(Some).ok_or((
            StatusCode::BAD_REQUEST,
            format!("unknown tl_basis '{value}'"),
        )),
    }
}
