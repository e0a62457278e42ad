//! Minimal Stripe Connect client.
//!
//! Covers the handful of endpoints the payment proxy needs: customers,
//! payment method cloning, and payment intents. Requests are form-encoded
//! the way Stripe's API expects; the `Stripe-Account` header scopes a call
//! to a connected account, its absence targets the platform account.

use std::collections::BTreeMap;

use reqwest::Client;
use serde::Deserialize;

const STRIPE_API_URL: &str = "https://api.stripe.com";

/// Error from a Stripe call. API errors keep the machine-readable `code` so
/// callers can tolerate specific conditions (e.g. a payment method that is
/// already attached).
#[derive(Debug)]
pub enum StripeError {
    Api {
        code: Option<String>,
        error_type: String,
        message: String,
    },
    Transport(String),
}

impl StripeError {
    pub fn code(&self) -> Option<&str> {
        match self {
            StripeError::Api { code, .. } => code.as_deref(),
            StripeError::Transport(_) => None,
        }
    }

}

impl From<StripeError> for crate::error::AppError {
    fn from(err: StripeError) -> Self {
        match err {
            // Card and API errors surface to the plugin as 402 with Stripe's message
            StripeError::Api {
                message, error_type, ..
            } => crate::error::AppError::Payment { message, error_type },
            StripeError::Transport(message) => {
                crate::error::AppError::Internal(format!("Stripe request failed: {}", message))
            }
        }
    }
}

type StripeResult<T> = std::result::Result<T, StripeError>;

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<Customer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub client_secret: Option<String>,
    pub next_action: Option<NextAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextAction {
    pub redirect_to_url: Option<RedirectToUrl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedirectToUrl {
    pub url: Option<String>,
}

impl PaymentIntent {
    /// Redirect URL for 3D Secure, present when status is `requires_action`.
    pub fn redirect_url(&self) -> Option<&str> {
        self.next_action
            .as_ref()
            .and_then(|n| n.redirect_to_url.as_ref())
            .and_then(|r| r.url.as_deref())
    }
}

#[derive(Debug, Default)]
pub struct CreateCustomerParams<'a> {
    pub email: &'a str,
    pub name: Option<&'a str>,
    pub payment_method: Option<&'a str>,
    pub default_payment_method: Option<&'a str>,
    pub metadata: BTreeMap<&'static str, String>,
}

#[derive(Debug)]
pub struct CreatePaymentIntentParams<'a> {
    pub amount: i64,
    pub currency: &'a str,
    pub customer: &'a str,
    pub payment_method: &'a str,
    pub application_fee_amount: Option<i64>,
    pub metadata: BTreeMap<&'static str, String>,
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
        }
    }

    /// List platform or connected-account customers with a matching email.
    /// Stripe returns newest first; callers take the head of an exact match.
    pub async fn list_customers_by_email(
        &self,
        email: &str,
        stripe_account: Option<&str>,
    ) -> StripeResult<Vec<Customer>> {
        let list: CustomerList = self
            .request(
                reqwest::Method::GET,
                &format!("/v1/customers?email={}&limit=10", urlencoding::encode(email)),
                None,
                stripe_account,
                None,
            )
            .await?;
        Ok(list.data)
    }

    /// Most recent non-deleted customer whose email matches, if any.
    pub async fn find_customer_by_email(
        &self,
        email: &str,
        stripe_account: Option<&str>,
    ) -> StripeResult<Option<Customer>> {
        let customers = self.list_customers_by_email(email, stripe_account).await?;
        Ok(customers.into_iter().find(|c| {
            !c.deleted
                && c.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
        }))
    }

    pub async fn create_customer(
        &self,
        params: CreateCustomerParams<'_>,
        stripe_account: Option<&str>,
    ) -> StripeResult<Customer> {
        let mut form: Vec<(String, String)> = vec![("email".into(), params.email.into())];
        if let Some(name) = params.name {
            form.push(("name".into(), name.into()));
        }
        if let Some(pm) = params.payment_method {
            form.push(("payment_method".into(), pm.into()));
        }
        if let Some(pm) = params.default_payment_method {
            form.push((
                "invoice_settings[default_payment_method]".into(),
                pm.into(),
            ));
        }
        for (key, value) in params.metadata {
            form.push((format!("metadata[{}]", key), value));
        }
        self.request(
            reqwest::Method::POST,
            "/v1/customers",
            Some(form),
            stripe_account,
            None,
        )
        .await
    }

    /// Set a customer's default payment method for invoices.
    pub async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        stripe_account: Option<&str>,
    ) -> StripeResult<Customer> {
        let form = vec![(
            "invoice_settings[default_payment_method]".to_string(),
            payment_method_id.to_string(),
        )];
        self.request(
            reqwest::Method::POST,
            &format!("/v1/customers/{}", customer_id),
            Some(form),
            stripe_account,
            None,
        )
        .await
    }

    pub async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
        stripe_account: Option<&str>,
    ) -> StripeResult<PaymentMethod> {
        let form = vec![("customer".to_string(), customer_id.to_string())];
        self.request(
            reqwest::Method::POST,
            &format!("/v1/payment_methods/{}/attach", payment_method_id),
            Some(form),
            stripe_account,
            None,
        )
        .await
    }

    /// Clone a platform payment method onto a connected account. The source
    /// method must already be attached to the given platform customer.
    pub async fn clone_payment_method(
        &self,
        platform_customer_id: &str,
        payment_method_id: &str,
        stripe_account: &str,
    ) -> StripeResult<PaymentMethod> {
        let form = vec![
            ("customer".to_string(), platform_customer_id.to_string()),
            ("payment_method".to_string(), payment_method_id.to_string()),
        ];
        self.request(
            reqwest::Method::POST,
            "/v1/payment_methods",
            Some(form),
            Some(stripe_account),
            None,
        )
        .await
    }

    pub async fn create_payment_intent(
        &self,
        params: CreatePaymentIntentParams<'_>,
        stripe_account: &str,
        idempotency_key: Option<&str>,
    ) -> StripeResult<PaymentIntent> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), params.amount.to_string()),
            ("currency".into(), params.currency.to_lowercase()),
            ("customer".into(), params.customer.into()),
            ("payment_method".into(), params.payment_method.into()),
            // The plugin confirms from the browser, required for 3D Secure
            ("confirm".into(), "false".into()),
            // Card stays usable for later off-session subscription charges
            ("setup_future_usage".into(), "off_session".into()),
        ];
        if let Some(fee) = params.application_fee_amount {
            form.push(("application_fee_amount".into(), fee.to_string()));
        }
        for (key, value) in params.metadata {
            form.push((format!("metadata[{}]", key), value));
        }
        self.request(
            reqwest::Method::POST,
            "/v1/payment_intents",
            Some(form),
            Some(stripe_account),
            idempotency_key,
        )
        .await
    }

    pub async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
        payment_method_id: &str,
        return_url: &str,
        stripe_account: &str,
    ) -> StripeResult<PaymentIntent> {
        let form = vec![
            ("payment_method".to_string(), payment_method_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        self.request(
            reqwest::Method::POST,
            &format!("/v1/payment_intents/{}/confirm", payment_intent_id),
            Some(form),
            Some(stripe_account),
            None,
        )
        .await
    }

    pub async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
        stripe_account: &str,
    ) -> StripeResult<PaymentIntent> {
        self.request(
            reqwest::Method::GET,
            &format!("/v1/payment_intents/{}", payment_intent_id),
            None,
            Some(stripe_account),
            None,
        )
        .await
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        form: Option<Vec<(String, String)>>,
        stripe_account: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> StripeResult<T> {
        let mut builder = self
            .client
            .request(method, format!("{}{}", STRIPE_API_URL, path))
            .bearer_auth(&self.secret_key);

        if let Some(account) = stripe_account {
            builder = builder.header("Stripe-Account", account);
        }
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        if let Some(form) = form {
            builder = builder.form(&form);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| StripeError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| StripeError::Transport(e.to_string()))?;

        if !status.is_success() {
            if let Ok(envelope) = serde_json::from_slice::<StripeErrorEnvelope>(&body) {
                return Err(StripeError::Api {
                    code: envelope.error.code,
                    error_type: envelope.error.error_type,
                    message: envelope
                        .error
                        .message
                        .unwrap_or_else(|| "Stripe request failed".to_string()),
                });
            }
            return Err(StripeError::Transport(format!(
                "Stripe returned HTTP {}",
                status
            )));
        }

        serde_json::from_slice(&body)
            .map_err(|e| StripeError::Transport(format!("Invalid Stripe response: {}", e)))
    }
}
