mod billing;
mod postmark;

pub use billing::*;
pub use postmark::*;

use axum::{routing::post, Router};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/billing", post(handle_billing_webhook))
        .route("/webhooks/postmark/inbound", post(handle_postmark_inbound))
}
