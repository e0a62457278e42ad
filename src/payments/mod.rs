//! Stripe Connect payment proxy.
//!
//! The WooCommerce plugin never holds platform API keys. It sends the order,
//! a platform-created payment method, and its connected account ID here; the
//! proxy clones the payment method onto the connected account and creates the
//! PaymentIntent there as a direct charge. Free-tier sites pay a platform
//! application fee, sites with a valid license pay none.

pub mod stripe;

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::util::normalize_domain;

use self::stripe::{CreateCustomerParams, CreatePaymentIntentParams, StripeClient};

/// Stripe rejects charges below 50 cents.
const MIN_AMOUNT_CENTS: i64 = 50;
/// Application fee for sites without a valid license.
const FREE_TIER_FEE_PERCENT: i64 = 2;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    pub order_id: i64,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub customer_email: String,
    pub customer_name: Option<String>,
    #[serde(default)]
    pub payment_method_id: String,
    #[serde(default)]
    pub payment_type: String,
    #[serde(default)]
    pub stripe_account_id: String,
    pub idempotency_key: Option<String>,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.amount < MIN_AMOUNT_CENTS {
            return Err(AppError::BadRequest(
                "Invalid amount (minimum $0.50)".into(),
            ));
        }
        if self.currency.is_empty() {
            return Err(AppError::BadRequest("Missing currency".into()));
        }
        if self.customer_email.is_empty() {
            return Err(AppError::BadRequest("Missing customer_email".into()));
        }
        if self.payment_method_id.is_empty() {
            return Err(AppError::BadRequest("Missing payment_method_id".into()));
        }
        if self.order_id == 0 {
            return Err(AppError::BadRequest("Missing order_id".into()));
        }
        if self.stripe_account_id.is_empty() {
            return Err(AppError::BadRequest("Missing stripe_account_id".into()));
        }
        Ok(())
    }

    /// Lowercased, trimmed email so case differences never fork customers.
    pub fn normalized_email(&self) -> String {
        self.customer_email.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeeBreakdown {
    pub percentage: i64,
    pub amount: i64,
    pub plan_type: &'static str,
}

/// Fee tier for a site, decided by whether any license is activated on its
/// domain and currently valid. 0% for licensed sites, 2% otherwise.
pub fn compute_application_fee(conn: &Connection, site_url: &str, amount: i64) -> Result<FeeBreakdown> {
    let domain = normalize_domain(site_url);
    let has_valid_license = match queries::find_activation_with_license(conn, &domain)? {
        Some((_, license)) => license.is_valid(chrono::Utc::now().timestamp()),
        None => false,
    };

    let percentage = if has_valid_license {
        0
    } else {
        FREE_TIER_FEE_PERCENT
    };
    Ok(FeeBreakdown {
        percentage,
        // Round half up, matching how the fee is advertised
        amount: (amount * percentage + 50) / 100,
        plan_type: if has_valid_license { "pro" } else { "free" },
    })
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub success: bool,
    pub client_secret: Option<String>,
    pub payment_intent_id: String,
    /// Customer on the connected account, stored by the plugin for
    /// subscription creation
    pub customer_id: String,
    /// Cloned payment method on the connected account
    pub payment_method_id: String,
    pub status: &'static str,
    pub fee: FeeBreakdown,
}

/// Run the full create-payment flow against Stripe. The request must already
/// be validated and the fee computed.
pub async fn create_payment(
    stripe: &StripeClient,
    request: &CreatePaymentRequest,
    site_url: &str,
    fee: FeeBreakdown,
) -> Result<CreatePaymentResponse> {
    let email = request.normalized_email();
    let account = request.stripe_account_id.as_str();

    tracing::info!(
        "Creating PaymentIntent for {}: amount={} fee={}% ({}) account={}",
        site_url,
        request.amount,
        fee.percentage,
        fee.plan_type,
        account
    );

    // The payment method must live on a platform customer before it can be
    // cloned to the connected account.
    let platform_customer = match stripe.find_customer_by_email(&email, None).await? {
        Some(customer) => customer,
        None => {
            let mut metadata = BTreeMap::new();
            metadata.insert("site_url", site_url.to_string());
            metadata.insert("source", "depositdesk".to_string());
            stripe
                .create_customer(
                    CreateCustomerParams {
                        email: &email,
                        name: request.customer_name.as_deref(),
                        metadata,
                        ..Default::default()
                    },
                    None,
                )
                .await?
        }
    };

    attach_tolerating_duplicate(
        stripe,
        &request.payment_method_id,
        &platform_customer.id,
        None,
    )
    .await?;

    let cloned = stripe
        .clone_payment_method(&platform_customer.id, &request.payment_method_id, account)
        .await?;
    tracing::debug!(
        "Cloned payment method {} -> {} on {}",
        request.payment_method_id,
        cloned.id,
        account
    );

    let connected_customer = match stripe.find_customer_by_email(&email, Some(account)).await? {
        Some(customer) => {
            attach_tolerating_duplicate(stripe, &cloned.id, &customer.id, Some(account)).await?;
            stripe
                .set_default_payment_method(&customer.id, &cloned.id, Some(account))
                .await?;
            customer
        }
        None => {
            let mut metadata = BTreeMap::new();
            metadata.insert("platform_customer_id", platform_customer.id.clone());
            metadata.insert("site_url", site_url.to_string());
            metadata.insert("wp_order_id", request.order_id.to_string());
            stripe
                .create_customer(
                    CreateCustomerParams {
                        email: &email,
                        name: request.customer_name.as_deref(),
                        payment_method: Some(&cloned.id),
                        default_payment_method: Some(&cloned.id),
                        metadata,
                    },
                    Some(account),
                )
                .await?
        }
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("site_url", site_url.to_string());
    metadata.insert("wp_order_id", request.order_id.to_string());
    metadata.insert("payment_type", request.payment_type.clone());
    metadata.insert("fee_percentage", fee.percentage.to_string());
    metadata.insert("platform_customer_id", platform_customer.id.clone());

    let intent = stripe
        .create_payment_intent(
            CreatePaymentIntentParams {
                amount: request.amount,
                currency: &request.currency,
                customer: &connected_customer.id,
                payment_method: &cloned.id,
                // Zero fees are omitted entirely, Stripe rejects fee=0
                application_fee_amount: (fee.amount > 0).then_some(fee.amount),
                metadata,
            },
            account,
            request.idempotency_key.as_deref(),
        )
        .await?;

    tracing::info!(
        "PaymentIntent {} created for {}, status {}",
        intent.id,
        site_url,
        intent.status
    );

    Ok(CreatePaymentResponse {
        success: true,
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
        customer_id: connected_customer.id,
        payment_method_id: cloned.id,
        status: "requires_confirmation",
        fee,
    })
}

/// Attach a payment method, treating "already attached" as success.
async fn attach_tolerating_duplicate(
    stripe: &StripeClient,
    payment_method_id: &str,
    customer_id: &str,
    stripe_account: Option<&str>,
) -> Result<()> {
    match stripe
        .attach_payment_method(payment_method_id, customer_id, stripe_account)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) if err.code() == Some("resource_already_exists") => {
            tracing::debug!(
                "Payment method {} already attached to a customer",
                payment_method_id
            );
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
