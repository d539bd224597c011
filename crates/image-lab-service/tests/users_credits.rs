//! User registration and credit ledger integration tests.

mod common;

use axum::http::StatusCode;
use common::{auth_header_for, TestHarness};
use image_lab_core::UserId;
use serde_json::json;

// ============================================================================
// Users
// ============================================================================

#[tokio::test]
async fn register_and_read_user() {
    let harness = TestHarness::new();
    harness.register().await;

    let response = harness
        .server
        .get("/v1/users/me")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], harness.test_user_id.to_string());
    assert_eq!(body["email"], "tester@example.com");
    assert_eq!(body["paid_credits"], 0);
    assert_eq!(body["free_credits_used"], false);
}

#[tokio::test]
async fn register_twice_conflicts() {
    let harness = TestHarness::new();
    harness.register().await;

    harness
        .server
        .post("/v1/users")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({}))
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn unregistered_user_is_not_found() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/credits")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn requests_without_valid_token_are_unauthorized() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/users/me")
        .await
        .assert_status_unauthorized();

    let response = harness
        .server
        .get("/v1/users/me")
        .add_header("authorization", "Bearer not-a-jwt")
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

// ============================================================================
// Credits
// ============================================================================

#[tokio::test]
async fn new_user_has_free_credit() {
    let harness = TestHarness::new();
    harness.register().await;

    let response = harness
        .server
        .get("/v1/credits")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["paid_credits"], 0);
    assert_eq!(body["free_credit_available"], true);
    assert!(body["next_free_credit_at"].is_null());
}

#[tokio::test]
async fn deduct_then_test_mode_leaves_balance() {
    let harness = TestHarness::new();
    harness.register().await;
    harness.set_credits(3, true).await;

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({
            "amount": 2,
            "transaction_key": "img1-studio-lighting-1700000000000",
            "transformation_type": "studio-lighting"
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["deducted"], 2);
    assert_eq!(body["used_free_credit"], false);
    assert_eq!(body["paid_credits"], 1);
    assert_eq!(body["transaction_key"], "img1-studio-lighting-1700000000000");

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 2, "test_mode": true }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["deducted"], 0);
    assert_eq!(body["test_mode"], true);
    assert_eq!(body["paid_credits"], 1);

    assert_eq!(harness.paid_credits().await, 1);
}

#[tokio::test]
async fn deduct_uses_free_credit_first() {
    let harness = TestHarness::new();
    harness.register().await;
    harness.set_credits(5, false).await;

    let body: serde_json::Value = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 3 }))
        .await
        .json();

    assert_eq!(body["used_free_credit"], true);
    assert_eq!(body["deducted"], 0);
    assert_eq!(body["paid_credits"], 5);

    let credits: serde_json::Value = harness
        .server
        .get("/v1/credits")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(credits["free_credit_available"], false);
    assert!(credits["next_free_credit_at"].is_string());
}

#[tokio::test]
async fn deduct_beyond_balance_is_payment_required() {
    let harness = TestHarness::new();
    harness.register().await;
    harness.set_credits(1, true).await;

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 2 }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["balance"], 1);
    assert_eq!(body["error"]["details"]["required"], 2);
    assert_eq!(harness.paid_credits().await, 1);
}

#[tokio::test]
async fn deduct_rejects_non_positive_amount() {
    let harness = TestHarness::new();
    harness.register().await;

    harness
        .server
        .post("/v1/credits/deduct")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 0 }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_mode_is_rejected_when_disabled() {
    let harness = TestHarness::with_config(|config| config.test_mode_allowed = false);
    harness.register().await;

    harness
        .server
        .post("/v1/credits/deduct")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "amount": 1, "test_mode": true }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn transactions_are_listed_newest_first() {
    let harness = TestHarness::new();
    harness.register().await;
    harness.set_credits(10, true).await;

    for amount in [1, 2] {
        harness
            .server
            .post("/v1/credits/deduct")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "amount": amount }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/credits/transactions?limit=2")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["amount"], -2);
    assert_eq!(transactions[0]["balance_after"], 7);
    assert_eq!(transactions[1]["amount"], -1);
    assert_eq!(body["has_more"], true);
}

#[tokio::test]
async fn users_do_not_see_each_other() {
    let harness = TestHarness::new();
    harness.register().await;

    let other = UserId::generate();
    harness
        .server
        .get("/v1/users/me")
        .add_header("authorization", auth_header_for(&other))
        .await
        .assert_status_not_found();
}
