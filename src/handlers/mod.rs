pub mod attachments;
pub mod licenses;
pub mod plugin;
pub mod support;
pub mod webhooks;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::AppState;
use crate::middleware::session_auth;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Account API: license self-service and support tickets.
/// License validate/status/deactivate authenticate by key in the body;
/// history and ticket actions need a Bearer session.
fn account_router(state: AppState) -> Router<AppState> {
    let session_routes = Router::new()
        .route("/licenses/history", get(licenses::license_history))
        .route("/support/tickets", post(support::create_ticket))
        .route(
            "/support/tickets/{ticket_id}/reply",
            post(support::reply_to_ticket),
        )
        .layer(from_fn_with_state(state, session_auth));

    Router::new()
        .route("/licenses/validate", post(licenses::validate_license))
        .route("/licenses/status", post(licenses::license_status))
        .route("/licenses/deactivate", post(licenses::deactivate_license))
        .route(
            "/ticket-attachments/{attachment_id}",
            get(attachments::download_attachment),
        )
        .merge(session_routes)
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", plugin::router())
        .nest("/api", account_router(state).merge(webhooks::router()))
}
