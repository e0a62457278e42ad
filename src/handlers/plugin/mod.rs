mod credentials;
mod license;
mod payments;

pub use credentials::*;
pub use license::*;
pub use payments::*;

use axum::{routing::post, Router};

use crate::db::AppState;

/// HMAC-authenticated API consumed by the WordPress plugin.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/license/register", post(register_license))
        .route("/payments/create", post(create_payment))
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/verify", post(verify_payment))
        .route(
            "/stripe-credentials",
            post(stripe_credentials).get(stripe_credentials_deprecated),
        )
}
