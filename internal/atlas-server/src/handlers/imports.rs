//! Import endpoints
//!
//! The desktop shell uploads files to a shared staging directory and passes
//! their paths here; the engine parses, dedupes and imports them.

use atlas_commission::db::{FreeCommissionInput, ImportResult};
use atlas_commission::model::ImportBatch;
use atlas_commission::{sheet, xempus};
use atlas_core::Cents;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

use super::{actor_from, error_response};

/// Request to import one carrier sheet from a staged file
#[derive(Deserialize, ToSchema)]
pub struct ImportSheetRequest {
    /// Path to the staged XLSX file
    pub path: String,
    /// Carrier whose sheet to parse; omitted means auto-detect
    pub carrier: Option<String>,
    /// Skip auto-matching (several sheets of one file upload back to back)
    #[serde(default)]
    pub skip_match: bool,
}

/// Import a carrier commission sheet
#[utoipa::path(
    post,
    path = "/imports/sheet",
    tag = "Imports",
    request_body = ImportSheetRequest,
    responses(
        (status = 200, description = "Import finished"),
        (status = 400, description = "Unknown carrier or unreadable file")
    )
)]
pub async fn import_sheet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ImportSheetRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let path = Path::new(&request.path);
    let carrier = match request.carrier {
        Some(carrier) => carrier,
        None => sheet::detect_carriers(path)
            .map_err(error_response)?
            .into_iter()
            .next()
            .map(|(carrier, _)| carrier)
            .ok_or((
                StatusCode::BAD_REQUEST,
                "no known carrier format detected".to_string(),
            ))?,
    };

    let parsed = sheet::parse_carrier_file(path, &carrier).map_err(error_response)?;
    let file_hash = sheet::compute_file_hash(path).map_err(error_response)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.path.clone());
    let actor = actor_from(&headers);

    let result: ImportResult = state
        .db
        .import_sheet(
            &parsed,
            &filename,
            Some(&file_hash),
            Some(&actor),
            request.skip_match,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

/// Request to import the Xempus contract export
#[derive(Deserialize, ToSchema)]
pub struct ImportXempusRequest {
    /// Path to the staged export file
    pub path: String,
}

/// Import the broker portal's contract export
#[utoipa::path(
    post,
    path = "/imports/xempus",
    tag = "Imports",
    request_body = ImportXempusRequest,
    responses(
        (status = 200, description = "Import finished")
    )
)]
pub async fn import_xempus(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ImportXempusRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let path = Path::new(&request.path);
    let parsed = xempus::parse_export(path).map_err(error_response)?;
    let file_hash = sheet::compute_file_hash(path).map_err(error_response)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.path.clone());
    let actor = actor_from(&headers);

    let result = state
        .db
        .import_xempus(&parsed, &filename, Some(&file_hash), Some(&actor))
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

/// A manually entered commission
#[derive(Deserialize, ToSchema)]
pub struct FreeCommissionRequest {
    pub vsnr: String,
    /// Signed amount in cents
    pub amount_cents: i64,
    pub payout_date: NaiveDate,
    pub carrier: String,
    pub consultant_id: Option<i64>,
    pub note: Option<String>,
}

/// Record a free commission
#[utoipa::path(
    post,
    path = "/imports/free-commission",
    tag = "Imports",
    request_body = FreeCommissionRequest,
    responses(
        (status = 200, description = "Commission recorded")
    )
)]
pub async fn create_free_commission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<FreeCommissionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    let input = FreeCommissionInput {
        vsnr: request.vsnr,
        amount: Cents(request.amount_cents),
        payout_date: request.payout_date,
        carrier: request.carrier,
        consultant_id: request.consultant_id,
        note: request.note,
    };
    let result = state
        .db
        .create_free_commission(&input, &actor)
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

/// List import batches, newest first
#[utoipa::path(
    get,
    path = "/imports",
    tag = "Imports",
    responses(
        (status = 200, description = "Batch history")
    )
)]
pub async fn list_import_batches(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let batches: Vec<ImportBatch> =
        state.db.get_import_batches().await.map_err(error_response)?;
    Ok(Json(batches))
}
