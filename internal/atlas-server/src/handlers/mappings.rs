//! Intermediary name mappings

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::AppState;

use super::{actor_from, error_response};

/// List mappings
#[utoipa::path(
    get,
    path = "/mappings",
    tag = "Mappings",
    responses(
        (status = 200, description = "Mappings ordered by normalized name")
    )
)]
pub async fn list_mappings(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mappings = state.db.get_mappings().await.map_err(error_response)?;
    Ok(Json(mappings))
}

/// New intermediary mapping
#[derive(Deserialize, ToSchema)]
pub struct CreateMappingRequest {
    /// Carrier-side intermediary name as written on the register
    pub name: String,
    pub employee_id: i64,
}

/// Map a carrier-side intermediary name to an employee
#[utoipa::path(
    post,
    path = "/mappings",
    tag = "Mappings",
    request_body = CreateMappingRequest,
    responses(
        (status = 200, description = "Mapping id (upserts on normalized name)")
    )
)]
pub async fn create_mapping(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateMappingRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    let id = state
        .db
        .create_mapping(&request.name, request.employee_id, &actor)
        .await
        .map_err(error_response)?;
    // New mappings may resolve waiting clearance rows right away.
    state.db.auto_match(None, &actor).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({ "id": id })))
}

/// Delete a mapping
#[utoipa::path(
    delete,
    path = "/mappings/{id}",
    tag = "Mappings",
    params(("id" = i64, Path, description = "Mapping id")),
    responses(
        (status = 204, description = "Mapping deleted")
    )
)]
pub async fn delete_mapping(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = actor_from(&headers);
    state
        .db
        .delete_mapping(id, &actor)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
