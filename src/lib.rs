//! Backend for a deposit-payments WordPress plugin: license activation with
//! per-domain slots, a Stripe Connect payment proxy, subscription-driven
//! license sync, and email-threaded support tickets.

pub mod billing;
pub mod config;
pub mod db;
pub mod email;
pub mod email_reply;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod licensing;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod rate_limit;
pub mod signature;
pub mod util;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
