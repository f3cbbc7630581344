//! Error types for the commission engine

use thiserror::Error;

use crate::model::SettlementStatus;

/// Errors surfaced by the commission pipeline.
///
/// Consistency errors (illegal transitions, frozen settlements) are
/// rejected at the boundary with no partial mutation; row-level input
/// errors never appear here, they are collected in batch results instead.
#[derive(Debug, Error)]
pub enum CommissionError {
    #[error("settlement transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: SettlementStatus,
        to: SettlementStatus,
    },

    #[error("settlement {id} is frozen ({status}, locked={locked})")]
    SettlementFrozen {
        id: i64,
        status: SettlementStatus,
        locked: bool,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("no column map for carrier '{0}'")]
    UnknownCarrier(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}
