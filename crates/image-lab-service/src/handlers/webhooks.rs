//! Payment webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use image_lab_core::{Payment, PaymentId, PaymentStatus, UserId};

use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::state::AppState;

/// Signature header.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Payment event from the payment provider.
#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    /// Provider event id.
    pub event_id: String,
    /// Paying user.
    pub user_id: String,
    /// Credits bought.
    pub credits: i64,
    /// Amount paid in minor units.
    #[serde(default)]
    pub amount_cents: i64,
    /// ISO currency code.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Provider status.
    pub status: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
    /// Credits added to the balance.
    pub credited: i64,
    /// Paid balance afterwards.
    pub paid_credits: i64,
}

/// Handle payment webhooks.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.payment_webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".into()))?;

        if !verify_signature(secret, body.as_bytes(), signature) {
            tracing::warn!("Invalid payment webhook signature");
            return Err(ApiError::BadRequest("Invalid webhook signature".into()));
        }
    } else {
        tracing::warn!("Payment webhook secret not configured - skipping signature verification");
    }

    let event: PaymentEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let user_id = event
        .user_id
        .parse::<UserId>()
        .map_err(|_| ApiError::BadRequest(format!("invalid user id: {}", event.user_id)))?;
    if event.event_id.trim().is_empty() {
        return Err(ApiError::BadRequest("event_id is required".into()));
    }
    if event.credits < 0 {
        return Err(ApiError::BadRequest("credits must not be negative".into()));
    }

    let status = PaymentStatus::from_str_lossy(&event.status);
    if status.grants_credits() && event.credits == 0 {
        return Err(ApiError::BadRequest(
            "a succeeded payment must grant credits".into(),
        ));
    }

    tracing::info!(
        event_id = %event.event_id,
        user_id = %user_id,
        status = status.as_str(),
        credits = event.credits,
        "Received payment webhook"
    );

    let payment = Payment {
        id: PaymentId::generate(),
        event_id: event.event_id,
        user_id,
        credits: event.credits,
        amount_cents: event.amount_cents,
        currency: event.currency.to_lowercase(),
        status,
        created_at: Utc::now(),
    };
    let balance = state.store.record_payment(&payment).await?;
    let credited = if status.grants_credits() {
        payment.credits
    } else {
        0
    };

    tracing::info!(
        event_id = %payment.event_id,
        user_id = %user_id,
        credited = credited,
        balance = balance,
        "Payment recorded"
    );

    Ok(Json(WebhookResponse {
        received: true,
        credited,
        paid_credits: balance,
    }))
}
