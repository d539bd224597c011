//! Transformation integration tests.
//!
//! The OpenAI backend is a wiremock server.

mod common;

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{auth_header_for, TestHarness, PNG_BYTES};
use image_lab_core::UserId;

/// Bytes the mocked backend returns.
const RESULT_PNG: &[u8] = b"\x89PNG\r\n\x1a\ntransformed body";

async fn openai_returning(template: ResponseTemplate, expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .respond_with(template)
        .expect(expected_calls)
        .mount(&server)
        .await;
    server
}

fn edited_image() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "created": 1_700_000_000,
        "data": [{ "b64_json": STANDARD.encode(RESULT_PNG) }]
    }))
}

fn harness_with_openai(server: &MockServer) -> TestHarness {
    let uri = server.uri();
    TestHarness::with_config(move |config| {
        config.openai_api_key = Some("sk-test".into());
        config.openai_base_url = uri;
    })
}

async fn create(harness: &TestHarness, body: Value) -> axum_test::TestResponse {
    harness
        .server
        .post("/v1/transformations")
        .add_header("authorization", harness.user_auth_header())
        .json(&body)
        .await
}

#[tokio::test]
async fn real_transformation_is_stored_and_charged() {
    let openai = openai_returning(edited_image(), 1).await;
    let harness = harness_with_openai(&openai);
    harness.register().await;
    harness.set_credits(5, true).await;
    let image_path = harness.upload_png().await;

    let response = create(
        &harness,
        json!({ "image_path": image_path, "enhancement_id": "studio-lighting" }),
    )
    .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["result"]["mode"], "real");
    assert_eq!(body["charge"]["plan"]["kind"], "paid");
    assert_eq!(body["charge"]["credits_charged"], 2);
    assert_eq!(body["charge"]["paid_credits"], 3);
    assert_eq!(body["transformation"]["status"], "completed");
    assert_eq!(body["transformation"]["transformation_type"], "studio-lighting");
    assert_eq!(body["transformation"]["credits_charged"], 2);

    let output = body["transformation"]["output_paths"][0].as_str().unwrap();
    assert_ne!(output, image_path);
    let stored = std::fs::read(harness.uploads_dir.path().join(output)).unwrap();
    assert_eq!(stored, RESULT_PNG);
    assert_eq!(body["result"]["transformed_url"], format!("/uploads/{output}"));
    assert_eq!(harness.paid_credits().await, 3);
}

#[tokio::test]
async fn free_credit_covers_first_transformation() {
    let openai = openai_returning(edited_image(), 1).await;
    let harness = harness_with_openai(&openai);
    harness.register().await;
    let image_path = harness.upload_png().await;

    let response = create(
        &harness,
        json!({ "image_path": image_path, "enhancement_id": "model-showcase" }),
    )
    .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["charge"]["plan"]["kind"], "free_credit");
    assert_eq!(body["charge"]["credits_charged"], 0);

    let credits: Value = harness
        .server
        .get("/v1/credits")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(credits["free_credit_available"], false);
    assert_eq!(credits["free_credits_used"], true);
}

#[tokio::test]
async fn backend_failure_falls_back_to_simulation_without_charge() {
    let openai = openai_returning(
        ResponseTemplate::new(500).set_body_json(json!({
            "error": { "message": "upstream exploded" }
        })),
        1,
    )
    .await;
    let harness = harness_with_openai(&openai);
    harness.register().await;
    harness.set_credits(5, true).await;
    let image_path = harness.upload_png().await;

    let response = create(
        &harness,
        json!({ "image_path": image_path, "prompt": "make it pop" }),
    )
    .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["result"]["mode"], "simulated");
    assert_eq!(body["result"]["reason"]["kind"], "fallback");
    assert_eq!(body["result"]["transformed_url"], body["result"]["original_url"]);
    assert_eq!(body["charge"]["credits_charged"], 0);
    assert_eq!(body["transformation"]["transformation_type"], "custom");
    assert_eq!(body["transformation"]["output_paths"], json!([]));
    assert_eq!(harness.paid_credits().await, 5);
}

#[tokio::test]
async fn fallback_is_charged_when_configured() {
    let openai = openai_returning(ResponseTemplate::new(503), 1).await;
    let uri = openai.uri();
    let harness = TestHarness::with_config(move |config| {
        config.openai_api_key = Some("sk-test".into());
        config.openai_base_url = uri;
        config.charge_simulated = true;
    });
    harness.register().await;
    harness.set_credits(5, true).await;
    let image_path = harness.upload_png().await;

    let body: Value = create(
        &harness,
        json!({ "image_path": image_path, "enhancement_id": "cartoon-style" }),
    )
    .await
    .json();

    assert_eq!(body["result"]["mode"], "simulated");
    assert_eq!(body["charge"]["credits_charged"], 1);
    assert_eq!(harness.paid_credits().await, 4);
}

#[tokio::test]
async fn requested_simulation_skips_backend_and_charge() {
    let openai = openai_returning(edited_image(), 0).await;
    let harness = harness_with_openai(&openai);
    harness.register().await;
    harness.set_credits(0, true).await;
    let image_path = harness.upload_png().await;

    let response = create(
        &harness,
        json!({
            "image_path": image_path,
            "enhancement_id": "anime-style",
            "simulate": true
        }),
    )
    .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["result"]["mode"], "simulated");
    assert_eq!(body["result"]["reason"]["kind"], "requested");
    assert_eq!(body["charge"]["plan"]["kind"], "waived");
}

#[tokio::test]
async fn insufficient_credits_rejected_before_backend_call() {
    let openai = openai_returning(edited_image(), 0).await;
    let harness = harness_with_openai(&openai);
    harness.register().await;
    harness.set_credits(1, true).await;
    let image_path = harness.upload_png().await;

    let response = create(
        &harness,
        json!({ "image_path": image_path, "enhancement_id": "model-showcase" }),
    )
    .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");

    let list: Value = harness
        .server
        .get("/v1/transformations")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(list["transformations"].as_array().unwrap().len(), 0);
    assert_eq!(harness.paid_credits().await, 1);
}

#[tokio::test]
async fn test_mode_leaves_balance_untouched() {
    let openai = openai_returning(edited_image(), 1).await;
    let harness = harness_with_openai(&openai);
    harness.register().await;
    harness.set_credits(3, true).await;
    let image_path = harness.upload_png().await;

    let body: Value = create(
        &harness,
        json!({
            "image_path": image_path,
            "enhancement_id": "studio-lighting",
            "test_mode": true
        }),
    )
    .await
    .json();

    assert_eq!(body["result"]["mode"], "real");
    assert_eq!(body["charge"]["plan"]["kind"], "waived");
    assert_eq!(harness.paid_credits().await, 3);
}

#[tokio::test]
async fn other_users_image_is_forbidden() {
    let harness = TestHarness::new();
    harness.register().await;
    let image_path = harness.upload_png().await;

    let intruder = UserId::generate();
    harness
        .server
        .post("/v1/users")
        .add_header("authorization", auth_header_for(&intruder))
        .json(&json!({}))
        .await
        .assert_status(StatusCode::CREATED);

    harness
        .server
        .post("/v1/transformations")
        .add_header("authorization", auth_header_for(&intruder))
        .json(&json!({ "image_path": image_path, "enhancement_id": "cartoon-style" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_option_and_missing_prompt_are_rejected() {
    let harness = TestHarness::new();
    harness.register().await;
    let image_path = harness.upload_png().await;

    create(
        &harness,
        json!({ "image_path": image_path, "enhancement_id": "no-such-option" }),
    )
    .await
    .assert_status_bad_request();

    create(&harness, json!({ "image_path": image_path }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn missing_image_is_not_found() {
    let harness = TestHarness::new();
    harness.register().await;

    create(
        &harness,
        json!({
            "image_path": format!("{}/missing.png", harness.test_user_id),
            "enhancement_id": "cartoon-style"
        }),
    )
    .await
    .assert_status_not_found();
}

#[tokio::test]
async fn without_backend_result_is_simulated() {
    let harness = TestHarness::new();
    harness.register().await;
    harness.set_credits(2, true).await;
    let image_path = harness.upload_png().await;

    let body: Value = create(
        &harness,
        json!({ "image_path": image_path, "enhancement_id": "era-1920s" }),
    )
    .await
    .json();

    assert_eq!(body["result"]["reason"]["kind"], "fallback");
    assert_eq!(harness.paid_credits().await, 2);
}

#[tokio::test]
async fn edit_runs_on_parent_input_and_counts() {
    let openai = openai_returning(edited_image(), 2).await;
    let harness = harness_with_openai(&openai);
    harness.register().await;
    harness.set_credits(10, true).await;
    let image_path = harness.upload_png().await;

    let parent: Value = create(
        &harness,
        json!({ "image_path": image_path, "enhancement_id": "cartoon-style" }),
    )
    .await
    .json();
    let parent_id = parent["transformation"]["id"].as_str().unwrap().to_string();

    let response = harness
        .server
        .post(&format!("/v1/transformations/{parent_id}/edits"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "brighter colours" }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let edit: Value = response.json();
    assert_eq!(edit["transformation"]["parent_id"], parent_id.as_str());
    assert_eq!(edit["transformation"]["input_path"], image_path.as_str());

    let parent: Value = harness
        .server
        .get(&format!("/v1/transformations/{parent_id}"))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(parent["edits_used"], 1);
    assert_eq!(harness.paid_credits().await, 8);
}

#[tokio::test]
async fn get_and_list_are_scoped_to_owner() {
    let harness = TestHarness::new();
    harness.register().await;
    let image_path = harness.upload_png().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let body: Value = create(
            &harness,
            json!({ "image_path": image_path, "prompt": "x", "simulate": true }),
        )
        .await
        .json();
        ids.push(body["transformation"]["id"].as_str().unwrap().to_string());
    }

    let page: Value = harness
        .server
        .get("/v1/transformations?limit=2")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(page["transformations"].as_array().unwrap().len(), 2);
    assert_eq!(page["has_more"], true);

    let fetched: Value = harness
        .server
        .get(&format!("/v1/transformations/{}", ids[0]))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(fetched["id"], ids[0].as_str());
    assert_eq!(fetched["input_url"], format!("/uploads/{image_path}"));

    let stranger = UserId::generate();
    harness
        .server
        .get(&format!("/v1/transformations/{}", ids[0]))
        .add_header("authorization", auth_header_for(&stranger))
        .await
        .assert_status_not_found();

    harness
        .server
        .get("/v1/transformations/not-an-id")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_bad_request();
}
