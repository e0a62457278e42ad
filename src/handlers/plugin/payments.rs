use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::payments::{self, CreatePaymentRequest, CreatePaymentResponse};
use crate::payments::stripe::StripeClient;
use crate::signature::verify_plugin_signature;

/// POST /api/v1/payments/create - create a PaymentIntent on the site's
/// connected account, cloning the platform payment method across.
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CreatePaymentResponse>> {
    let verified = verify_plugin_signature(&state.config.plugin_secret_key, &headers, &body)?;

    state
        .limits
        .check_payment(&format!("payment:{}", verified.site_url))
        .map_err(|retry_after| AppError::RateLimited { retry_after })?;

    let request: CreatePaymentRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid JSON body".into()))?;
    request.validate()?;

    let stripe = require_stripe(&state)?;

    // Fee tier is decided before any Stripe call; the pool handle is dropped
    // first so it never lives across an await.
    let fee = {
        let conn = state.db.get()?;
        payments::compute_application_fee(&conn, &verified.site_url, request.amount)?
    };

    let response = payments::create_payment(stripe, &request, &verified.site_url, fee).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub payment_intent_id: String,
    #[serde(default)]
    pub payment_method_id: String,
    #[serde(default)]
    pub stripe_account_id: String,
    #[serde(default)]
    pub return_url: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    pub success: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action_redirect_url: Option<String>,
}

/// POST /api/v1/payments/confirm - confirm a PaymentIntent on the connected
/// account. 3D Secure cards come back as `requires_action` with a redirect.
pub async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConfirmPaymentResponse>> {
    let verified = verify_plugin_signature(&state.config.plugin_secret_key, &headers, &body)?;

    state
        .limits
        .check_payment(&format!("payment-confirm:{}", verified.site_url))
        .map_err(|retry_after| AppError::RateLimited { retry_after })?;

    let request: ConfirmPaymentRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid JSON body".into()))?;
    if request.payment_intent_id.is_empty() {
        return Err(AppError::BadRequest("Missing payment_intent_id".into()));
    }
    if request.payment_method_id.is_empty() {
        return Err(AppError::BadRequest("Missing payment_method_id".into()));
    }
    if request.stripe_account_id.is_empty() {
        return Err(AppError::BadRequest("Missing stripe_account_id".into()));
    }
    if request.return_url.is_empty() {
        return Err(AppError::BadRequest("Missing return_url".into()));
    }

    let stripe = require_stripe(&state)?;

    tracing::info!(
        "Confirming PaymentIntent {} on {}",
        request.payment_intent_id,
        request.stripe_account_id
    );

    let intent = stripe
        .confirm_payment_intent(
            &request.payment_intent_id,
            &request.payment_method_id,
            &request.return_url,
            &request.stripe_account_id,
        )
        .await?;

    if intent.status == "requires_action" {
        if let Some(url) = intent.redirect_url() {
            return Ok(Json(ConfirmPaymentResponse {
                success: true,
                status: "requires_action".into(),
                next_action_redirect_url: Some(url.to_string()),
            }));
        }
    }

    Ok(Json(ConfirmPaymentResponse {
        success: true,
        status: intent.status,
        next_action_redirect_url: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(default)]
    pub payment_intent_id: String,
    #[serde(default)]
    pub stripe_account_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub status: String,
}

/// POST /api/v1/payments/verify - report a PaymentIntent's status after a
/// 3D Secure redirect.
pub async fn verify_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VerifyPaymentResponse>> {
    let verified = verify_plugin_signature(&state.config.plugin_secret_key, &headers, &body)?;

    state
        .limits
        .check_payment(&format!("payment-verify:{}", verified.site_url))
        .map_err(|retry_after| AppError::RateLimited { retry_after })?;

    let request: VerifyPaymentRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid JSON body".into()))?;
    if request.payment_intent_id.is_empty() {
        return Err(AppError::BadRequest("Missing payment_intent_id".into()));
    }
    if request.stripe_account_id.is_empty() {
        return Err(AppError::BadRequest("Missing stripe_account_id".into()));
    }

    let stripe = require_stripe(&state)?;
    let intent = stripe
        .retrieve_payment_intent(&request.payment_intent_id, &request.stripe_account_id)
        .await?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        status: intent.status,
    }))
}

fn require_stripe(state: &AppState) -> Result<&StripeClient> {
    state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::Internal("Stripe not configured".into()))
}
