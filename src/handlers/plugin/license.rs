use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::licensing::{self, RegisterOutcome};
use crate::signature::verify_plugin_signature;
use crate::util::{extract_client_ip, redact_key};

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    action: Option<String>,
    license_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub status: &'static str,
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_domains: Option<i32>,
}

impl RegisterResponse {
    /// Response for activate/deactivate. Business failures keep HTTP 200 and
    /// carry a typed `status` the plugin branches on.
    fn from_outcome(outcome: RegisterOutcome) -> Self {
        match outcome {
            RegisterOutcome::Invalid => Self::failure("invalid", None, "Invalid license key"),
            RegisterOutcome::Canceled => {
                Self::failure("canceled", None, "License has been canceled")
            }
            RegisterOutcome::Expired { expires_at } => {
                Self::failure("expired", Some(expires_at), "License has expired")
            }
            RegisterOutcome::Inactive {
                expires_at: Some(expires_at),
            } => Self::failure("inactive", Some(expires_at), "License is not active"),
            // Deactivate path: always a plain success
            RegisterOutcome::Inactive { expires_at: None } => Self {
                success: true,
                status: "inactive",
                expires_at: None,
                message: None,
                activated_domains: None,
                max_domains: None,
            },
            RegisterOutcome::NotActivated {
                expires_at,
                activated_domains,
                max_domains,
            } => Self {
                success: true,
                status: "not_activated",
                expires_at: Some(expires_at),
                message: None,
                activated_domains: Some(activated_domains),
                max_domains: Some(max_domains),
            },
            RegisterOutcome::LimitReached {
                expires_at,
                activated_domains,
                max_domains,
            } => Self {
                success: false,
                status: "limit_reached",
                expires_at: Some(expires_at),
                message: Some(format!(
                    "License activation limit reached ({} domains). Currently activated on: {}",
                    max_domains,
                    activated_domains.join(", ")
                )),
                activated_domains: Some(activated_domains),
                max_domains: Some(max_domains),
            },
            RegisterOutcome::Active {
                expires_at,
                activated_domains,
                max_domains,
            } => Self {
                success: true,
                status: "active",
                expires_at: Some(expires_at),
                message: None,
                activated_domains: Some(activated_domains),
                max_domains: Some(max_domains),
            },
        }
    }

    /// Response for the read-only `check` action: always `success: true`,
    /// the status alone tells the plugin what it wants to know.
    fn from_check_outcome(outcome: RegisterOutcome) -> Self {
        let mut response = Self::from_outcome(outcome);
        response.success = true;
        response.message = None;
        response
    }

    fn failure(status: &'static str, expires_at: Option<i64>, message: &str) -> Self {
        Self {
            success: false,
            status,
            expires_at,
            message: Some(message.to_string()),
            activated_domains: None,
            max_domains: None,
        }
    }
}

/// POST /api/v1/license/register - activate, deactivate, or check a license
/// for the signing site.
pub async fn register_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RegisterResponse>> {
    let verified = verify_plugin_signature(&state.config.plugin_secret_key, &headers, &body)?;

    state
        .limits
        .check_license(&format!("license:{}", verified.site_url))
        .map_err(|retry_after| AppError::RateLimited { retry_after })?;

    let request: RegisterRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid JSON body".into()))?;

    let action = request
        .action
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing action".into()))?;
    if request.license_key.is_none() && action != "deactivate" {
        return Err(AppError::BadRequest("Missing license_key".into()));
    }
    let license_key = request.license_key.as_deref().unwrap_or_default();

    tracing::info!(
        "License {} request for {} - Key: {}",
        action,
        verified.site_url,
        redact_key(license_key)
    );

    let ip = extract_client_ip(&headers);
    let mut conn = state.db.get()?;

    let response = match action {
        "activate" => RegisterResponse::from_outcome(licensing::activate(
            &mut conn,
            license_key,
            &verified.site_url,
            ip.as_deref(),
            "plugin_activation",
        )?),
        "deactivate" => RegisterResponse::from_outcome(licensing::deactivate(
            &mut conn,
            license_key,
            &verified.site_url,
            ip.as_deref(),
            "plugin_deactivation",
        )?),
        "check" => RegisterResponse::from_check_outcome(licensing::check(
            &conn,
            license_key,
            &verified.site_url,
        )?),
        _ => return Err(AppError::BadRequest("Invalid action".into())),
    };

    Ok(Json(response))
}
