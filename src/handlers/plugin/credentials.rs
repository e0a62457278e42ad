use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::signature::verify_plugin_signature_with_org;

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub success: bool,
    pub data: CredentialsData,
}

#[derive(Debug, Serialize)]
pub struct CredentialsData {
    pub client_id: String,
    pub client_secret: String,
}

/// POST /api/v1/stripe-credentials - hand the Connect OAuth credentials to a
/// registered site. All tenants share the platform OAuth app; the fee tier is
/// decided by the payment proxy, not by separate apps.
pub async fn stripe_credentials(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CredentialsResponse>> {
    let verified = {
        let conn = state.db.get()?;
        verify_plugin_signature_with_org(&state.config.plugin_secret_key, &headers, &body, &conn)?
    };

    state
        .limits
        .check_license(&format!("oauth:{}", verified.site_url))
        .map_err(|retry_after| AppError::RateLimited { retry_after })?;

    let (Some(client_id), Some(client_secret)) = (
        state.config.stripe_connect_client_id.clone(),
        state.config.stripe_secret_key.clone(),
    ) else {
        tracing::error!("Stripe Connect OAuth credentials not configured");
        return Err(AppError::Internal(
            "Stripe Connect credentials not configured".into(),
        ));
    };

    tracing::info!("Providing Connect credentials to {}", verified.site_url);

    Ok(Json(CredentialsResponse {
        success: true,
        data: CredentialsData {
            client_id,
            client_secret,
        },
    }))
}

/// GET /api/v1/stripe-credentials - retired unsigned variant.
pub async fn stripe_credentials_deprecated() -> AppError {
    AppError::MethodNotAllowed("GET method deprecated. Use POST with HMAC signature.".into())
}
