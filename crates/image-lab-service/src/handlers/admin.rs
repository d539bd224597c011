//! Admin handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use image_lab_core::{CreditTransaction, UserId};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::users::UserResponse;
use crate::retention::SweepReport;
use crate::state::AppState;

fn parse_user_id(id: &str) -> Result<UserId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user id: {id}")))
}

/// Credit overwrite request.
#[derive(Debug, Deserialize)]
pub struct SetCreditsRequest {
    /// New paid balance (absolute, clamped at zero); absent keeps it.
    pub paid_credits: Option<i64>,
    /// Mark the free credit as spent now.
    #[serde(default)]
    pub used_free_credit: bool,
}

/// Overwrite a user's credit state.
pub async fn set_user_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(user_id): Path<String>,
    Json(body): Json<SetCreditsRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let user = state
        .store
        .update_user_credits(&user_id, body.used_free_credit, body.paid_credits)
        .await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %user_id,
        paid_credits = user.paid_credits,
        used_free_credit = body.used_free_credit,
        "Admin updated user credits"
    );

    Ok(Json(UserResponse::from(&user)))
}

/// Credit grant request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Credits to add.
    pub credits: i64,
    /// Reason recorded on the transaction.
    pub reason: Option<String>,
}

/// Credit grant response.
#[derive(Debug, Serialize)]
pub struct GrantCreditsResponse {
    /// User ID.
    pub user_id: String,
    /// Credits added.
    pub credits_added: i64,
    /// Paid balance afterwards.
    pub paid_credits: i64,
}

/// Add paid credits to a user.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(user_id): Path<String>,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<Json<GrantCreditsResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    if body.credits <= 0 {
        return Err(ApiError::BadRequest("credits must be positive".into()));
    }

    let reason = body
        .reason
        .unwrap_or_else(|| format!("Admin grant by {}", admin.admin_id));
    let tx = CreditTransaction::adjustment(user_id, body.credits, 0, reason)
        .with_metadata(serde_json::json!({ "admin_id": admin.admin_id }));
    let balance = state
        .store
        .add_paid_credits(&user_id, body.credits, &tx)
        .await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %user_id,
        credits = body.credits,
        balance = balance,
        "Admin granted credits"
    );

    Ok(Json(GrantCreditsResponse {
        user_id: user_id.to_string(),
        credits_added: body.credits,
        paid_credits: balance,
    }))
}

/// Run the retention sweep now.
pub async fn run_retention_sweep(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
) -> Json<SweepReport> {
    tracing::info!(admin_id = %admin.admin_id, "Admin triggered retention sweep");
    Json(state.sweeper.sweep_once().await)
}
