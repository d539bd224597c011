//! Configuration introspection.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use image_lab_core::FREE_CREDIT_WINDOW_DAYS;

use crate::state::AppState;

/// Public view of the configuration. Carries no secrets.
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    /// Whether OpenAI is configured.
    pub openai_configured: bool,
    /// Whether the product webhook is configured.
    pub product_webhook_configured: bool,
    /// Whether transformations can only be simulated.
    pub simulation_only: bool,
    /// Whether clients may request test mode.
    pub test_mode_allowed: bool,
    /// Whether fallback-simulated results are charged.
    pub charge_simulated: bool,
    /// Credit cost of a free-text prompt.
    pub custom_prompt_cost: i64,
    /// Length of the free-credit window in days.
    pub free_credit_window_days: i64,
    /// Days transformations and uploads are kept.
    pub retention_days: i64,
    /// Maximum request body (and upload) size in bytes.
    pub max_upload_bytes: usize,
    /// Public URL prefix for stored files.
    pub uploads_base_url: String,
}

/// Configuration introspection endpoint.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        openai_configured: state.has_openai(),
        product_webhook_configured: state.has_product_webhook(),
        simulation_only: !state.invoker.has_backend(),
        test_mode_allowed: config.test_mode_allowed,
        charge_simulated: config.charge_simulated,
        custom_prompt_cost: config.custom_prompt_cost,
        free_credit_window_days: FREE_CREDIT_WINDOW_DAYS,
        retention_days: config.retention_days,
        max_upload_bytes: config.max_body_bytes,
        uploads_base_url: state.uploads.url_for(""),
    })
}
