//! ATLAS Commission API
//!
//! HTTP API for the commission reconciliation engine: imports, matching,
//! rate models, settlements and the audit trail. The desktop shell is the
//! only intended consumer.

mod config;
mod handlers;

use anyhow::Result;
use atlas_commission::db::Database;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;

/// Application state shared across handlers
pub struct AppState {
    pub db: Database,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ATLAS Commission API",
        version = "1.0.0",
        description = "Commission reconciliation: imports, matching, rate models and monthly settlements",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    paths(
        handlers::health,
        handlers::import_sheet,
        handlers::import_xempus,
        handlers::create_free_commission,
        handlers::list_import_batches,
        handlers::get_clearance,
        handlers::get_clearance_counts,
        handlers::auto_match,
        handlers::manual_match,
        handlers::ignore_commission,
        handlers::set_override,
        handlers::reset_override,
        handlers::set_note,
        handlers::get_audit_log,
        handlers::list_settlements,
        handlers::month_summary,
        handlers::generate_settlements,
        handlers::update_settlement_status,
        handlers::set_settlement_locked,
        handlers::list_models,
        handlers::create_model,
        handlers::update_model_rate,
        handlers::list_employees,
        handlers::update_employee_rates,
        handlers::list_mappings,
        handlers::create_mapping,
        handlers::delete_mapping,
    ),
    components(schemas(
        handlers::HealthResponse,
        handlers::ImportSheetRequest,
        handlers::ImportXempusRequest,
        handlers::FreeCommissionRequest,
        handlers::AutoMatchRequest,
        handlers::ManualMatchRequest,
        handlers::OverrideRequest,
        handlers::NoteRequest,
        handlers::SettlementParams,
        handlers::MonthParams,
        handlers::GenerateRequest,
        handlers::StatusRequest,
        handlers::LockRequest,
        handlers::CreateModelRequest,
        handlers::RateChangeRequest,
        handlers::EmployeeRatesRequest,
        handlers::CreateMappingRequest,
    )),
    tags(
        (name = "System", description = "System health endpoints"),
        (name = "Imports", description = "Sheet, Xempus and free-commission imports"),
        (name = "Commissions", description = "Clearance, matching, overrides"),
        (name = "Settlements", description = "Monthly settlement snapshots"),
        (name = "Rate models", description = "Versioned rate models and employee overrides"),
        (name = "Mappings", description = "Intermediary name mappings"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("Starting ATLAS Commission API");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Connect to database and apply the schema
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    info!("Connected to database");

    // Create application state
    let state = Arc::new(AppState { db });

    // Build router
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health))
        .route("/imports", get(handlers::list_import_batches))
        .route("/imports/sheet", post(handlers::import_sheet))
        .route("/imports/xempus", post(handlers::import_xempus))
        .route(
            "/imports/free-commission",
            post(handlers::create_free_commission),
        )
        .route("/commissions/clearance", get(handlers::get_clearance))
        .route(
            "/commissions/clearance/counts",
            get(handlers::get_clearance_counts),
        )
        .route("/commissions/match", post(handlers::auto_match))
        .route("/commissions/:id/match", post(handlers::manual_match))
        .route("/commissions/:id/ignore", post(handlers::ignore_commission))
        .route(
            "/commissions/:id/override",
            post(handlers::set_override).delete(handlers::reset_override),
        )
        .route("/commissions/:id/note", put(handlers::set_note))
        .route("/audit", get(handlers::get_audit_log))
        .route("/dashboard/summary", get(handlers::month_summary))
        .route("/settlements", get(handlers::list_settlements))
        .route("/settlements/generate", post(handlers::generate_settlements))
        .route(
            "/settlements/:id/status",
            put(handlers::update_settlement_status),
        )
        .route("/settlements/:id/lock", put(handlers::set_settlement_locked))
        .route("/models", get(handlers::list_models).post(handlers::create_model))
        .route("/models/:id/rate", put(handlers::update_model_rate))
        .route("/employees", get(handlers::list_employees))
        .route("/employees/:id/rates", put(handlers::update_employee_rates))
        .route(
            "/mappings",
            get(handlers::list_mappings).post(handlers::create_mapping),
        )
        .route("/mappings/:id", axum::routing::delete(handlers::delete_mapping))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
