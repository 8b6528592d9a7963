//! HTTP API
//!
//! Handlers extract the caller with [`CurrentActor`] and hand it to the
//! services, which do all permission checks. Errors map to status codes by
//! category; see [`ApiError`].

pub mod actor;
pub mod appointments;
pub mod catalog;
pub mod donors;
pub mod extract;
pub mod response;

use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

pub use actor::CurrentActor;
pub use response::{ApiError, ApiResponse, ApiResult};

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn create_router(app: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Donor routes
        .route("/donors", get(donors::list_donors).post(donors::create_donor))
        .route("/donors/:id", get(donors::get_donor))
        .route("/donors/:id/history", get(donors::donor_history))
        .route("/donors/:id/events", post(donors::apply_event))
        .route("/donors/:id/reject", post(donors::reject_donor))
        .route("/donors/:id/visits", get(donors::list_donor_visits))

        // Approval routes
        .route("/donors/:id/approve", post(donors::approve_donor))
        .route("/donors/:id/approval", get(donors::approval_status))
        .route("/donors/:id/approval/preview", post(donors::approval_preview))
        .route("/donors/:id/approval/provider", post(donors::approval_select_provider))
        .route("/donors/:id/approval/initiate", post(donors::approval_initiate))
        .route("/donors/:id/approval/resend", post(donors::approval_resend))
        .route("/donors/:id/approval/cancel", post(donors::approval_cancel))
        .route("/approval/providers", get(donors::list_providers))

        // Points routes
        .route("/donors/:id/points", get(donors::donor_points))
        .route("/donors/:id/redeem", post(donors::redeem_gift))

        // Appointment routes
        .route(
            "/appointments",
            get(appointments::list_appointments).post(appointments::book_appointment),
        )
        .route("/appointments/slots", get(appointments::available_slots))
        .route("/appointments/:id", get(appointments::get_appointment))
        .route("/appointments/:id/check-in", post(appointments::check_in))
        .route("/appointments/:id/complete", post(appointments::complete))
        .route("/appointments/:id/mark_failed", post(appointments::mark_failed))
        .route("/appointments/:id/cancel", post(appointments::cancel))
        .route(
            "/appointments/:id/donation",
            get(appointments::get_donation).post(appointments::record_donation),
        )

        // Catalog routes
        .route("/gifts", get(catalog::list_gifts).post(catalog::create_gift))
        .route("/gifts/:id/restock", post(catalog::restock_gift))
        .route(
            "/resources",
            get(catalog::list_resources).post(catalog::create_resource),
        )
        .route("/resources/:id/deactivate", post(catalog::deactivate_resource))

        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
