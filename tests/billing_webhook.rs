//! Tests for the billing webhook and the subscription-to-license sync.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use depositdesk::db::queries;
use depositdesk::models::SubscriptionStatus;

mod common;
use common::*;

fn subscription_event(event_type: &str, sub_id: &str, customer: &str, status: &str, period_end: i64) -> serde_json::Value {
    json!({
        "type": event_type,
        "data": {
            "object": {
                "id": sub_id,
                "customer": customer,
                "status": status,
                "current_period_end": period_end
            }
        }
    })
}

#[tokio::test]
async fn missing_or_invalid_signature_is_rejected() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let payload = subscription_event("customer.subscription.updated", "sub_1", "cus_1", "active", in_one_year());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/billing")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/billing")
                .header("content-type", "application/json")
                .header("x-signature", "0000")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_customer_is_acknowledged_without_changes() {
    let (state, _dir) = test_state();
    let app = test_app(state.clone());

    let response = app
        .oneshot(signed_billing_post(&subscription_event(
            "customer.subscription.created",
            "sub_x",
            "cus_stranger",
            "active",
            in_one_year(),
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    assert!(queries::get_subscription(&conn, "sub_x").unwrap().is_none());
}

#[tokio::test]
async fn subscription_update_links_license_and_mirrors_period_end() {
    let (state, _dir) = test_state();
    let license_id;
    let period_end = in_one_year();
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", None);
        set_billing_customer(&conn, &org.id, "cus_acme");
        // License created at checkout before the subscription webhook lands
        license_id = create_test_license(&conn, &org.id, 1, 0).id;
    }
    let app = test_app(state.clone());

    let response = app
        .oneshot(signed_billing_post(&subscription_event(
            "customer.subscription.created",
            "sub_acme",
            "cus_acme",
            "active",
            period_end,
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let subscription = queries::get_subscription(&conn, "sub_acme").unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert!(subscription.active);

    let license = queries::get_license_by_id(&conn, &license_id).unwrap().unwrap();
    assert_eq!(license.subscription_id.as_deref(), Some("sub_acme"));
    assert_eq!(license.expires_at, period_end);
    assert!(license.active);
    assert!(license.deleted_at.is_none());
}

#[tokio::test]
async fn cancellation_soft_deletes_and_auto_deactivates_domains() {
    let (state, _dir) = test_state();
    let (license_key, license_id);
    let period_end = in_one_year();
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", None);
        set_billing_customer(&conn, &org.id, "cus_acme");
        let license = create_test_license(&conn, &org.id, 2, period_end);
        license_key = license.license_key;
        license_id = license.id;
    }
    let app = test_app(state.clone());

    // Link the license, then activate two domains through the account API
    let response = app
        .clone()
        .oneshot(signed_billing_post(&subscription_event(
            "customer.subscription.created",
            "sub_acme",
            "cus_acme",
            "active",
            period_end,
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for domain in ["a.example", "b.example"] {
        let response = app
            .clone()
            .oneshot(json_post(
                "/api/licenses/validate",
                &json!({"licenseKey": license_key, "domain": domain}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let deleted_event = subscription_event(
        "customer.subscription.deleted",
        "sub_acme",
        "cus_acme",
        "canceled",
        period_end,
    );
    let response = app
        .clone()
        .oneshot(signed_billing_post(&deleted_event))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_id(&conn, &license_id).unwrap().unwrap();
    assert!(!license.active);
    assert!(license.deleted_at.is_some());
    assert!(queries::activated_domains(&conn, &license_id).unwrap().is_empty());

    let activities = queries::list_activities(&conn, &license_id, 50).unwrap();
    let auto: Vec<_> = activities
        .iter()
        .filter(|a| a.action_type.as_ref() == "AUTO_DEACTIVATE")
        .collect();
    assert_eq!(auto.len(), 2);
    for activity in &auto {
        let metadata = activity.metadata.as_ref().unwrap();
        assert_eq!(metadata["reason"], "subscription_canceled");
        assert_eq!(metadata["subscription_id"], "sub_acme");
    }
    let count_before = queries::count_activities(&conn, &license_id).unwrap();
    drop(conn);

    // Redelivery of the same event changes nothing
    let response = app.oneshot(signed_billing_post(&deleted_event)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let conn = state.db.get().unwrap();
    assert_eq!(queries::count_activities(&conn, &license_id).unwrap(), count_before);
}

#[tokio::test]
async fn pause_clears_activations_but_keeps_the_license() {
    let (state, _dir) = test_state();
    let (license_key, license_id);
    let period_end = in_one_year();
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", None);
        set_billing_customer(&conn, &org.id, "cus_acme");
        let license = create_test_license(&conn, &org.id, 1, period_end);
        license_key = license.license_key;
        license_id = license.id;
    }
    let app = test_app(state.clone());

    let response = app
        .clone()
        .oneshot(signed_billing_post(&subscription_event(
            "customer.subscription.created",
            "sub_acme",
            "cus_acme",
            "active",
            period_end,
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_post(
            "/api/licenses/validate",
            &json!({"licenseKey": license_key, "domain": "a.example"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut paused = subscription_event(
        "customer.subscription.paused",
        "sub_acme",
        "cus_acme",
        "active",
        period_end,
    );
    paused["data"]["object"]["pause_collection"] = json!({"behavior": "void"});
    let response = app.oneshot(signed_billing_post(&paused)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_id(&conn, &license_id).unwrap().unwrap();
    // Paused is recoverable: not soft-deleted, just inactive with no slots
    assert!(!license.active);
    assert!(license.deleted_at.is_none());
    assert!(queries::activated_domains(&conn, &license_id).unwrap().is_empty());

    let activities = queries::list_activities(&conn, &license_id, 50).unwrap();
    let auto = activities
        .iter()
        .find(|a| a.action_type.as_ref() == "AUTO_DEACTIVATE")
        .unwrap();
    assert_eq!(auto.metadata.as_ref().unwrap()["reason"], "subscription_paused");
}

#[tokio::test]
async fn invoice_paid_extends_the_license_expiry() {
    let (state, _dir) = test_state();
    let license_id;
    let first_period = in_one_year();
    let next_period = first_period + 30 * 86400;
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", None);
        set_billing_customer(&conn, &org.id, "cus_acme");
        license_id = create_test_license(&conn, &org.id, 1, first_period).id;
    }
    let app = test_app(state.clone());

    let response = app
        .clone()
        .oneshot(signed_billing_post(&subscription_event(
            "customer.subscription.created",
            "sub_acme",
            "cus_acme",
            "active",
            first_period,
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(signed_billing_post(&json!({
            "type": "invoice.paid",
            "data": {
                "object": {
                    "subscription": "sub_acme",
                    "period_end": next_period
                }
            }
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let subscription = queries::get_subscription(&conn, "sub_acme").unwrap().unwrap();
    assert_eq!(subscription.period_ends_at, next_period);
    let license = queries::get_license_by_id(&conn, &license_id).unwrap().unwrap();
    assert_eq!(license.expires_at, next_period);
}

#[tokio::test]
async fn late_invoice_does_not_reactivate_a_paused_subscription() {
    let (state, _dir) = test_state();
    let (license_key, license_id);
    let period_end = in_one_year();
    let next_period = period_end + 30 * 86400;
    {
        let conn = state.db.get().unwrap();
        let org = create_test_org(&conn, "Acme", None);
        set_billing_customer(&conn, &org.id, "cus_acme");
        let license = create_test_license(&conn, &org.id, 1, period_end);
        license_key = license.license_key;
        license_id = license.id;
    }
    let app = test_app(state.clone());

    let response = app
        .clone()
        .oneshot(signed_billing_post(&subscription_event(
            "customer.subscription.created",
            "sub_acme",
            "cus_acme",
            "active",
            period_end,
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(json_post(
            "/api/licenses/validate",
            &json!({"licenseKey": license_key, "domain": "a.example"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut paused = subscription_event(
        "customer.subscription.paused",
        "sub_acme",
        "cus_acme",
        "active",
        period_end,
    );
    paused["data"]["object"]["pause_collection"] = json!({"behavior": "void"});
    let response = app.clone().oneshot(signed_billing_post(&paused)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A replayed renewal invoice lands after the pause
    let response = app
        .oneshot(signed_billing_post(&json!({
            "type": "invoice.paid",
            "data": {
                "object": {
                    "subscription": "sub_acme",
                    "period_end": next_period
                }
            }
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let subscription = queries::get_subscription(&conn, "sub_acme").unwrap().unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Paused);
    assert!(!subscription.active);
    // Paid-through date still moves; the license stays dormant
    assert_eq!(subscription.period_ends_at, next_period);
    let license = queries::get_license_by_id(&conn, &license_id).unwrap().unwrap();
    assert!(!license.active);
    assert_eq!(license.expires_at, next_period);
    assert!(queries::activated_domains(&conn, &license_id).unwrap().is_empty());
}

#[tokio::test]
async fn unhandled_events_are_acknowledged() {
    let (state, _dir) = test_state();
    let app = test_app(state);

    let response = app
        .oneshot(signed_billing_post(&json!({
            "type": "charge.refunded",
            "data": {"object": {}}
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
