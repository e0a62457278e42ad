//! Shared helpers for integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use depositdesk::config::Config;
use depositdesk::db::{queries, AppState};
use depositdesk::models::{License, Organization, SubscriptionStatus, UpsertSubscription, User};
use depositdesk::signature::sign_plugin_request;

pub const TEST_PLUGIN_SECRET: &str = "test-plugin-secret";
pub const TEST_BILLING_SECRET: &str = "test-billing-secret";
pub const TEST_EMAIL_DOMAIN: &str = "depositdesk.test";

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: ":memory:".to_string(),
        base_url: "http://localhost".to_string(),
        dev_mode: true,
        plugin_secret_key: TEST_PLUGIN_SECRET.to_string(),
        stripe_secret_key: None,
        stripe_connect_client_id: None,
        billing_webhook_secret: Some(TEST_BILLING_SECRET.to_string()),
        postmark_server_token: None,
        support_email: format!("support@{}", TEST_EMAIL_DOMAIN),
        support_email_inbound: format!("inbound@{}", TEST_EMAIL_DOMAIN),
        email_domain: TEST_EMAIL_DOMAIN.to_string(),
    }
}

/// Fresh state backed by a temp-file database. Keep the returned TempDir
/// alive for the duration of the test.
pub fn test_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("test.db");
    let pool = depositdesk::db::init_db(path.to_str().unwrap()).expect("init db");
    (AppState::new(pool, test_config()), dir)
}

pub fn test_app(state: AppState) -> axum::Router {
    depositdesk::app(state)
}

pub fn create_test_org(
    conn: &rusqlite::Connection,
    name: &str,
    site_url: Option<&str>,
) -> Organization {
    queries::create_organization(conn, name, site_url).expect("create org")
}

pub fn create_test_user(conn: &rusqlite::Connection, org_id: &str, email: &str) -> User {
    queries::create_user(conn, org_id, email, Some("Test User")).expect("create user")
}

/// Create a user plus a live session, returning the Bearer token.
pub fn create_test_session(conn: &rusqlite::Connection, user_id: &str) -> String {
    queries::create_session(conn, user_id, 3600)
        .expect("create session")
        .token
}

pub fn create_test_license(
    conn: &rusqlite::Connection,
    org_id: &str,
    max_domains: i32,
    expires_at: i64,
) -> License {
    queries::create_license(
        conn,
        &queries::CreateLicense {
            organization_id: org_id,
            max_domains,
            expires_at,
            subscription_id: None,
        },
    )
    .expect("create license")
}

pub fn create_test_subscription(
    conn: &rusqlite::Connection,
    id: &str,
    org_id: &str,
    status: SubscriptionStatus,
    active: bool,
    period_ends_at: i64,
) {
    queries::upsert_subscription(
        conn,
        &UpsertSubscription {
            id: id.to_string(),
            organization_id: org_id.to_string(),
            status,
            active,
            period_ends_at,
        },
    )
    .expect("upsert subscription");
}

/// Orgs get their billing customer ID during checkout; tests set it directly.
pub fn set_billing_customer(conn: &rusqlite::Connection, org_id: &str, customer_id: &str) {
    conn.execute(
        "UPDATE organizations SET billing_customer_id = ?1 WHERE id = ?2",
        rusqlite::params![customer_id, org_id],
    )
    .expect("set billing customer");
}

pub fn in_one_year() -> i64 {
    Utc::now().timestamp() + 365 * 86400
}

/// POST request carrying valid plugin HMAC headers.
pub fn signed_plugin_post(uri: &str, site_url: &str, body: &serde_json::Value) -> Request<Body> {
    let payload = serde_json::to_vec(body).unwrap();
    let timestamp = Utc::now().timestamp();
    let signature = sign_plugin_request(TEST_PLUGIN_SECRET, site_url, timestamp, &payload);

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-Plugin-Signature", signature)
        .header("X-Site-URL", site_url)
        .header("X-Timestamp", timestamp.to_string())
        .body(Body::from(payload))
        .unwrap()
}

pub fn json_post(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn authed_request(method: &str, uri: &str, token: &str, body: Option<&serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json");
    match body {
        Some(b) => builder
            .body(Body::from(serde_json::to_vec(b).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Billing webhook request with a valid HMAC signature.
pub fn signed_billing_post(body: &serde_json::Value) -> Request<Body> {
    let payload = serde_json::to_vec(body).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(TEST_BILLING_SECRET.as_bytes()).unwrap();
    mac.update(&payload);
    let signature = hex::encode(mac.finalize().into_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/webhooks/billing")
        .header("content-type", "application/json")
        .header("x-signature", signature)
        .body(Body::from(payload))
        .unwrap()
}

pub async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).expect("Response should be valid JSON")
}
