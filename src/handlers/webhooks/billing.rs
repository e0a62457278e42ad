//! Billing provider webhook.
//!
//! Subscription lifecycle events land here and drive the license sync
//! routine. Events for unknown customers or subscriptions are acknowledged
//! with 200 so the provider stops retrying; only transport-level problems
//! return errors.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::billing::sync_license_from_subscription;
use crate::db::{queries, AppState};
use crate::models::{SubscriptionStatus, UpsertSubscription};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct BillingWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: BillingEventData,
}

#[derive(Debug, Deserialize)]
pub struct BillingEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BillingSubscription {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    pause_collection: Option<serde_json::Value>,
    current_period_end: i64,
}

impl BillingSubscription {
    fn mapped_status(&self) -> SubscriptionStatus {
        if self.pause_collection.is_some() {
            return SubscriptionStatus::Paused;
        }
        match self.status.as_str() {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "paused" => SubscriptionStatus::Paused,
            _ => SubscriptionStatus::Canceled,
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.mapped_status(), SubscriptionStatus::Active)
    }
}

#[derive(Debug, Deserialize)]
struct BillingInvoice {
    subscription: Option<String>,
    #[serde(default)]
    period_end: i64,
}

pub async fn handle_billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = match headers.get("x-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s,
        None => return (StatusCode::BAD_REQUEST, "Missing x-signature header"),
    };

    let Some(ref secret) = state.config.billing_webhook_secret else {
        tracing::error!("BILLING_WEBHOOK_SECRET not configured");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Webhook not configured");
    };
    if !verify_signature(secret, &body, signature) {
        tracing::warn!("Billing webhook signature mismatch");
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let event: BillingWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse billing webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    tracing::info!("Billing webhook: {}", event.event_type);

    match event.event_type.as_str() {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.paused"
        | "customer.subscription.resumed" => handle_subscription_change(&state, &event, false),
        "customer.subscription.deleted" => handle_subscription_change(&state, &event, true),
        "invoice.paid" => handle_invoice_paid(&state, &event),
        "invoice.payment_failed" => {
            tracing::warn!("Invoice payment failed event received");
            (StatusCode::OK, "Acknowledged")
        }
        _ => (StatusCode::OK, "Event ignored"),
    }
}

fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() == 1
}

/// Upsert the subscription row from the event and run the license sync.
/// Deleted subscriptions stay in the table with status `canceled`; the sync
/// routine needs the row to find and clean up the linked licenses.
fn handle_subscription_change(
    state: &AppState,
    event: &BillingWebhookEvent,
    deleted: bool,
) -> (StatusCode, &'static str) {
    let subscription: BillingSubscription = match serde_json::from_value(event.data.object.clone())
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to parse subscription object: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid subscription object");
        }
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let organization =
        match queries::get_organization_by_billing_customer_id(&conn, &subscription.customer) {
            Ok(Some(org)) => org,
            Ok(None) => {
                tracing::warn!(
                    "No organization for billing customer {}",
                    subscription.customer
                );
                return (StatusCode::OK, "Unknown customer");
            }
            Err(e) => {
                tracing::error!("DB error: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
            }
        };

    let (status, active) = if deleted {
        (SubscriptionStatus::Canceled, false)
    } else {
        (subscription.mapped_status(), subscription.is_active())
    };

    let upsert = UpsertSubscription {
        id: subscription.id.clone(),
        organization_id: organization.id,
        status,
        active,
        period_ends_at: subscription.current_period_end,
    };
    if let Err(e) = queries::upsert_subscription(&conn, &upsert) {
        tracing::error!("Failed to upsert subscription: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    match sync_license_from_subscription(&mut conn, &subscription.id) {
        Ok(_) => (StatusCode::OK, "Processed"),
        Err(e) => {
            tracing::error!("License sync failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Sync failed")
        }
    }
}

/// Renewal payment: push the license expiry out to the new period end, then
/// run the full sync for the rest of the state. Payment events never change
/// the subscription status; a replayed invoice must not undo a pause or
/// cancellation delivered earlier.
fn handle_invoice_paid(state: &AppState, event: &BillingWebhookEvent) -> (StatusCode, &'static str) {
    let invoice: BillingInvoice = match serde_json::from_value(event.data.object.clone()) {
        Ok(i) => i,
        Err(e) => {
            tracing::error!("Failed to parse invoice object: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid invoice object");
        }
    };

    let Some(subscription_id) = invoice.subscription else {
        return (StatusCode::OK, "Invoice without subscription");
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let subscription = match queries::get_subscription(&conn, &subscription_id) {
        Ok(Some(s)) => s,
        Ok(None) => {
            tracing::warn!("Invoice for unknown subscription {}", subscription_id);
            return (StatusCode::OK, "Unknown subscription");
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let period_ends_at = if invoice.period_end > 0 {
        invoice.period_end
    } else {
        subscription.period_ends_at
    };

    let upsert = UpsertSubscription {
        id: subscription.id.clone(),
        organization_id: subscription.organization_id.clone(),
        status: subscription.status,
        active: subscription.active,
        period_ends_at,
    };
    if let Err(e) = queries::upsert_subscription(&conn, &upsert) {
        tracing::error!("Failed to update subscription period: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    if let Err(e) = queries::extend_license_expiry_for_subscription(&conn, &subscription.id, period_ends_at)
    {
        tracing::error!("Failed to extend license expiry: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    match sync_license_from_subscription(&mut conn, &subscription.id) {
        Ok(report) => {
            tracing::info!(
                "Invoice paid: synced {} license(s) for {}",
                report.updated,
                subscription.id
            );
            (StatusCode::OK, "Processed")
        }
        Err(e) => {
            tracing::error!("License sync failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Sync failed")
        }
    }
}
