//! Account-facing license API.
//!
//! `validate`, `status`, and `deactivate` authenticate by license key in the
//! body (they are called from site admin screens before any session exists);
//! `history` requires a Bearer session and reads the caller's own license.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Extension;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::UserContext;
use crate::models::SubscriptionStatus;
use crate::util::{extract_client_ip, normalize_domain};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[serde(default)]
    license_key: String,
    #[serde(default)]
    domain: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_domains: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slots_remaining: Option<i32>,
    pub message: String,
}

impl ValidateResponse {
    fn rejected(message: &str, expires_at: Option<i64>) -> Self {
        Self {
            valid: false,
            active: Some(false),
            expires_at,
            activated_domain: None,
            activated_domains: None,
            activation_count: None,
            max_domains: None,
            slots_remaining: None,
            message: message.to_string(),
        }
    }
}

/// POST /api/licenses/validate - validate a license for a domain, taking a
/// free activation slot when the domain is new and one is available.
pub async fn validate_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>> {
    if request.license_key.is_empty() || request.domain.is_empty() {
        return Err(AppError::BadRequest(
            "License key and domain are required".into(),
        ));
    }

    let mut conn = state.db.get()?;
    let license = queries::get_license_by_key(&conn, &request.license_key)?
        .ok_or_else(|| AppError::NotFound("Invalid license key".into()))?;

    let now = Utc::now().timestamp();
    if license.is_deleted() {
        return Ok(Json(ValidateResponse::rejected(
            "License has been deactivated",
            None,
        )));
    }
    if license.is_expired(now) {
        return Ok(Json(ValidateResponse::rejected(
            "License has expired",
            Some(license.expires_at),
        )));
    }
    if !license.active {
        return Ok(Json(ValidateResponse::rejected(
            "License is not active",
            None,
        )));
    }

    let domain = normalize_domain(&request.domain);
    let activated_domains = queries::activated_domains(&conn, &license.id)?;
    let already_activated = activated_domains
        .iter()
        .any(|d| normalize_domain(d) == domain);

    if already_activated {
        let count = activated_domains.len() as i32;
        return Ok(Json(ValidateResponse {
            valid: true,
            active: Some(true),
            expires_at: Some(license.expires_at),
            activated_domain: Some(domain),
            activated_domains: Some(activated_domains),
            activation_count: Some(count),
            max_domains: Some(license.max_domains),
            slots_remaining: Some((license.max_domains - count).max(0)),
            message: "License is valid".to_string(),
        }));
    }

    let ip = extract_client_ip(&headers);
    let outcome = queries::activate_domain_atomic(
        &mut conn,
        &license.id,
        &domain,
        license.max_domains,
        ip.as_deref(),
        "api_validation",
    )?;

    match outcome {
        queries::ActivationOutcome::LimitReached { activated_domains } => {
            Ok(Json(ValidateResponse {
                valid: false,
                active: Some(false),
                expires_at: None,
                activated_domain: activated_domains.first().cloned(),
                max_domains: Some(license.max_domains),
                slots_remaining: Some(0),
                activation_count: None,
                message: format!(
                    "License activation limit reached. Currently activated on: {}",
                    activated_domains.join(", ")
                ),
                activated_domains: Some(activated_domains),
            }))
        }
        queries::ActivationOutcome::Activated { activated_domains }
        | queries::ActivationOutcome::AlreadyActive { activated_domains } => {
            let count = activated_domains.len() as i32;
            Ok(Json(ValidateResponse {
                valid: true,
                active: Some(true),
                expires_at: Some(license.expires_at),
                activated_domain: Some(domain),
                activated_domains: Some(activated_domains),
                activation_count: Some(count),
                max_domains: Some(license.max_domains),
                slots_remaining: Some((license.max_domains - count).max(0)),
                message: "License activated successfully".to_string(),
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateRequest {
    #[serde(default)]
    license_key: String,
    #[serde(default)]
    domain: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_domains: Option<Vec<String>>,
}

/// POST /api/licenses/deactivate - release one domain slot.
pub async fn deactivate_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeactivateRequest>,
) -> Result<Json<DeactivateResponse>> {
    if request.license_key.is_empty() || request.domain.is_empty() {
        return Err(AppError::BadRequest(
            "License key and domain are required".into(),
        ));
    }

    let mut conn = state.db.get()?;
    let license = queries::get_license_by_key(&conn, &request.license_key)?
        .ok_or_else(|| AppError::NotFound("Invalid license key".into()))?;

    let domain = normalize_domain(&request.domain);
    let activated_domains = queries::activated_domains(&conn, &license.id)?;
    let is_activated = activated_domains
        .iter()
        .any(|d| normalize_domain(d) == domain);

    if !is_activated {
        if activated_domains.is_empty() {
            return Ok(Json(DeactivateResponse {
                success: false,
                message: "License is not activated on any domain".to_string(),
                remaining_domains: None,
            }));
        }
        return Err(AppError::Forbidden(format!(
            "Domain {} is not activated. Currently activated on: {}",
            domain,
            activated_domains.join(", ")
        )));
    }

    let ip = extract_client_ip(&headers);
    let (_, remaining) =
        queries::deactivate_domain(&mut conn, &license.id, &domain, ip.as_deref(), "api_deactivation")?;

    Ok(Json(DeactivateResponse {
        success: true,
        message: format!("License deactivated from {}", domain),
        remaining_domains: Some(remaining),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    #[serde(default)]
    license_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub valid: bool,
    pub license_key: String,
    pub status: &'static str,
    pub expires_at: Option<i64>,
    pub renewal_date: Option<i64>,
    pub subscription_status: Option<String>,
    pub activated_domain: Option<String>,
    pub activated_domains: Vec<String>,
    pub max_domains: i32,
    pub slots_remaining: i32,
    pub activation_count: i32,
    pub can_activate: bool,
    pub message: String,
}

/// POST /api/licenses/status - renewal date, subscription state, and slot
/// usage for a license.
pub async fn license_status(
    State(state): State<AppState>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<StatusResponse>> {
    if request.license_key.is_empty() {
        return Err(AppError::BadRequest("License key is required".into()));
    }

    let conn = state.db.get()?;
    let license = queries::get_license_by_key(&conn, &request.license_key)?
        .ok_or_else(|| AppError::NotFound("Invalid license key".into()))?;

    let now = Utc::now().timestamp();
    let subscription = match license.subscription_id.as_deref() {
        Some(id) => queries::get_subscription(&conn, id)?,
        None => None,
    };
    let subscription_status = subscription.as_ref().map(|s| s.status.as_ref().to_string());
    let is_paused = subscription
        .as_ref()
        .is_some_and(|s| s.status == SubscriptionStatus::Paused);
    let has_active_subscription =
        queries::has_active_subscription(&conn, &license.organization_id)?;

    let activated_domains = queries::activated_domains(&conn, &license.id)?;
    let slots_remaining = (license.max_domains - activated_domains.len() as i32).max(0);

    let mut can_activate = false;
    let (status, message) = if license.is_deleted() {
        ("canceled", "License has been canceled")
    } else if license.is_expired(now) {
        ("expired", "License has expired")
    } else if is_paused {
        ("paused", "Subscription is paused")
    } else if !has_active_subscription {
        ("canceled", "No active subscription")
    } else {
        can_activate = slots_remaining > 0;
        ("active", "License is valid and active")
    };

    Ok(Json(StatusResponse {
        valid: status == "active",
        license_key: request.license_key,
        status,
        expires_at: Some(license.expires_at),
        renewal_date: subscription.as_ref().map(|s| s.period_ends_at),
        subscription_status,
        activated_domain: activated_domains.first().cloned(),
        activation_count: activated_domains.len() as i32,
        activated_domains,
        max_domains: license.max_domains,
        slots_remaining,
        can_activate,
        message: message.to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityHistoryItem {
    pub action: String,
    pub domain: Option<String>,
    pub occurred_at: i64,
    pub ip_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub license_key: String,
    pub activation_count: i32,
    pub max_domains: i32,
    pub current_domains: Vec<String>,
    pub history: Vec<ActivityHistoryItem>,
}

/// GET /api/licenses/history - current activation state plus the latest 50
/// activity rows for the caller's organization license.
pub async fn license_history(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<HistoryResponse>> {
    let conn = state.db.get()?;
    let license = queries::get_license_for_organization(&conn, &ctx.organization.id)?
        .ok_or_else(|| AppError::NotFound("No license found".into()))?;

    let current_domains = queries::activated_domains(&conn, &license.id)?;
    let activities = queries::list_activities(&conn, &license.id, 50)?;

    Ok(Json(HistoryResponse {
        license_key: license.license_key,
        activation_count: current_domains.len() as i32,
        max_domains: license.max_domains,
        current_domains,
        history: activities
            .into_iter()
            .map(|a| ActivityHistoryItem {
                action: a.action_type.as_ref().to_string(),
                domain: a.domain,
                occurred_at: a.occurred_at,
                ip_address: a.ip_address,
            })
            .collect(),
    }))
}
