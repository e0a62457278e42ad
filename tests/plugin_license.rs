//! Tests for the HMAC-authenticated plugin license endpoint.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::json;
use tower::ServiceExt;

mod common;
use common::*;

#[tokio::test]
async fn activate_succeeds_and_is_idempotent_across_url_forms() {
    let (state, _dir) = test_state();
    let license_key;
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", Some("https://example.com"));
        license_key = create_test_license(&conn, &org.id, 1, in_one_year()).license_key;
    }
    let app = test_app(state.clone());

    let body = json!({"action": "activate", "license_key": license_key});
    let response = app
        .clone()
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://example.com",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = response_json(response).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["status"], "active");
    assert_eq!(first["activated_domains"], json!(["example.com"]));

    // Same site with www. and trailing slash resolves to the same slot
    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://www.example.com/",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second = response_json(response).await;
    assert_eq!(second["status"], "active");
    assert_eq!(second["activated_domains"], json!(["example.com"]));

    // Lifetime counter bumped exactly once
    let conn = state.db.get().unwrap();
    let license = depositdesk::db::queries::get_license_by_key(&conn, &license_key)
        .unwrap()
        .unwrap();
    assert_eq!(license.activation_count, 1);
}

#[tokio::test]
async fn second_domain_hits_the_limit_and_lists_current_domains() {
    let (state, _dir) = test_state();
    let license_key;
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", Some("https://example.com"));
        license_key = create_test_license(&conn, &org.id, 1, in_one_year()).license_key;
    }
    let app = test_app(state);

    let body = json!({"action": "activate", "license_key": license_key});
    let response = app
        .clone()
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://example.com",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response_json(response).await["status"], "active");

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://other.com",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let limit = response_json(response).await;
    assert_eq!(limit["success"], false);
    assert_eq!(limit["status"], "limit_reached");
    assert_eq!(limit["activated_domains"], json!(["example.com"]));
    assert_eq!(limit["max_domains"], 1);
}

#[tokio::test]
async fn expired_license_reports_expired() {
    let (state, _dir) = test_state();
    let license_key;
    let expired_at = Utc::now().timestamp() - 86400;
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", Some("https://example.com"));
        license_key = create_test_license(&conn, &org.id, 1, expired_at).license_key;
    }
    let app = test_app(state);

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://example.com",
            &json!({"action": "activate", "license_key": license_key}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "expired");
    assert_eq!(body["expires_at"], expired_at);
}

#[tokio::test]
async fn deactivate_never_discloses_whether_the_key_exists() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://example.com",
            &json!({"action": "deactivate", "license_key": "dd_does_not_exist"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "inactive");
    assert_eq!(body["expires_at"], serde_json::Value::Null);
}

#[tokio::test]
async fn check_reports_not_activated_without_taking_a_slot() {
    let (state, _dir) = test_state();
    let license_key;
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", Some("https://example.com"));
        license_key = create_test_license(&conn, &org.id, 2, in_one_year()).license_key;
    }
    let app = test_app(state.clone());

    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://example.com",
            &json!({"action": "check", "license_key": license_key}),
        ))
        .await
        .unwrap();
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "not_activated");

    let conn = state.db.get().unwrap();
    let license = depositdesk::db::queries::get_license_by_key(&conn, &license_key)
        .unwrap()
        .unwrap();
    let domains = depositdesk::db::queries::activated_domains(&conn, &license.id).unwrap();
    assert!(domains.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_activations_never_exceed_the_domain_limit() {
    let (state, _dir) = test_state();
    let license_key;
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", Some("https://example.com"));
        license_key = create_test_license(&conn, &org.id, 1, in_one_year()).license_key;
    }
    let app = test_app(state.clone());

    let body = json!({"action": "activate", "license_key": license_key});
    let fire = |site: &'static str| {
        let app = app.clone();
        let body = body.clone();
        async move {
            let response = app
                .oneshot(signed_plugin_post("/api/v1/license/register", site, &body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            response_json(response).await["status"]
                .as_str()
                .unwrap()
                .to_string()
        }
    };

    let statuses = tokio::join!(
        tokio::spawn(fire("https://one.example")),
        tokio::spawn(fire("https://two.example")),
        tokio::spawn(fire("https://three.example")),
        tokio::spawn(fire("https://four.example")),
    );
    let statuses = [
        statuses.0.unwrap(),
        statuses.1.unwrap(),
        statuses.2.unwrap(),
        statuses.3.unwrap(),
    ];

    let winners = statuses.iter().filter(|s| *s == "active").count();
    let losers = statuses.iter().filter(|s| *s == "limit_reached").count();
    assert_eq!(winners, 1, "statuses: {:?}", statuses);
    assert_eq!(losers, 3, "statuses: {:?}", statuses);

    let conn = state.db.get().unwrap();
    let license = depositdesk::db::queries::get_license_by_key(&conn, &license_key)
        .unwrap()
        .unwrap();
    assert_eq!(license.activation_count, 1);
    assert_eq!(
        depositdesk::db::queries::activated_domains(&conn, &license.id)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn missing_signature_headers_are_unauthorized() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/license/register")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tampered_body_is_forbidden() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let mut request = signed_plugin_post(
        "/api/v1/license/register",
        "https://example.com",
        &json!({"action": "check", "license_key": "dd_x"}),
    );
    *request.body_mut() = Body::from(r#"{"action":"activate","license_key":"dd_x"}"#);

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn license_endpoint_rate_limits_per_site() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let body = json!({"action": "check", "license_key": "dd_missing"});
    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(signed_plugin_post(
                "/api/v1/license/register",
                "https://burst.example",
                &body,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://burst.example",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let limited = response_json(response).await;
    assert!(limited["retry_after"].as_u64().unwrap() >= 1);

    // A different site is unaffected
    let response = app
        .oneshot(signed_plugin_post(
            "/api/v1/license/register",
            "https://calm.example",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
