//! HTTP request handlers for the commission API
//!
//! This module is organized into submodules by functionality:
//! - `health` - System health endpoints
//! - `imports` - Sheet/Xempus/free-commission imports and batch history
//! - `commissions` - Clearance, matching, overrides and notes
//! - `settlements` - Monthly settlement generation and status machine
//! - `models` - Rate models and employee rate overrides
//! - `mappings` - Intermediary name mappings

mod commissions;
mod health;
mod imports;
mod mappings;
mod models;
mod settlements;

// Re-export all handlers
pub use commissions::*;
pub use health::*;
pub use imports::*;
pub use mappings::*;
pub use models::*;
pub use settlements::*;

use atlas_commission::CommissionError;
use axum::http::{HeaderMap, StatusCode};

/// Map engine errors onto HTTP status codes.
pub(crate) fn error_response(e: CommissionError) -> (StatusCode, String) {
    let status = match &e {
        CommissionError::NotFound { .. } => StatusCode::NOT_FOUND,
        CommissionError::InvalidTransition { .. } | CommissionError::SettlementFrozen { .. } => {
            StatusCode::CONFLICT
        }
        CommissionError::UnknownCarrier(_) | CommissionError::Spreadsheet(_) => {
            StatusCode::BAD_REQUEST
        }
        CommissionError::Io(_) | CommissionError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// The acting user, taken from the `X-User` header the desktop shell sets.
pub(crate) fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get("x-user")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("backoffice")
        .to_string()
}
