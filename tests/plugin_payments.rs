//! Tests for the payment proxy endpoints that run before any Stripe call.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

mod common;
use common::*;

fn payment_body(amount: i64) -> serde_json::Value {
    json!({
        "order_id": 1042,
        "amount": amount,
        "currency": "usd",
        "customer_email": "pat@example.com",
        "payment_method_id": "pm_123",
        "payment_type": "deposit",
        "stripe_account_id": "acct_123"
    })
}

#[tokio::test]
async fn create_rejects_amounts_below_the_stripe_minimum() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/payments/create",
            "https://shop.example",
            &payment_body(49),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Invalid amount (minimum $0.50)");
}

#[tokio::test]
async fn create_rejects_missing_fields() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let mut missing_currency = payment_body(1000);
    missing_currency["currency"] = json!("");
    let response = app
        .clone()
        .oneshot(signed_plugin_post(
            "/api/v1/payments/create",
            "https://shop.example",
            &missing_currency,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["error"], "Missing currency");

    let mut missing_account = payment_body(1000);
    missing_account["stripe_account_id"] = json!("");
    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/payments/create",
            "https://shop.example",
            &missing_account,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(response).await["error"],
        "Missing stripe_account_id"
    );
}

#[tokio::test]
async fn create_requires_a_valid_signature() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/payments/create")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&payment_body(1000)).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn confirm_requires_all_fields() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/payments/confirm",
            "https://shop.example",
            &json!({
                "payment_intent_id": "pi_123",
                "payment_method_id": "pm_123",
                "stripe_account_id": "acct_123"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["error"], "Missing return_url");
}

#[tokio::test]
async fn verify_requires_a_payment_intent_id() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/payments/verify",
            "https://shop.example",
            &json!({"stripe_account_id": "acct_123"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(response).await["error"],
        "Missing payment_intent_id"
    );
}

#[tokio::test]
async fn stripe_credentials_requires_a_registered_site() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/stripe-credentials",
            "https://unregistered.example",
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["error"], "Site not registered");
}

#[tokio::test]
async fn stripe_credentials_are_returned_to_registered_sites() {
    let dir = tempfile::tempdir().unwrap();
    let pool = depositdesk::db::init_db(dir.path().join("test.db").to_str().unwrap()).unwrap();
    let mut config = test_config();
    config.stripe_connect_client_id = Some("ca_test_123".to_string());
    config.stripe_secret_key = Some("sk_test_123".to_string());
    let state = depositdesk::db::AppState::new(pool, config);
    {
        let conn = state.db.get().unwrap();
        create_test_org(&conn, "Acme", Some("https://shop.example"));
    }
    let app = test_app(state);

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/stripe-credentials",
            "https://shop.example",
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["client_id"], "ca_test_123");
    assert_eq!(body["data"]["client_secret"], "sk_test_123");
}

#[tokio::test]
async fn stripe_credentials_get_is_deprecated() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/stripe-credentials")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = response_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("deprecated"));
}
