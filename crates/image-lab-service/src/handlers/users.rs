//! User registration handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use image_lab_core::User;
use image_lab_store::StoreError;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// User response.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    /// User ID.
    pub user_id: String,
    /// Contact email.
    pub email: Option<String>,
    /// Paid credit balance.
    pub paid_credits: i64,
    /// Whether the free credit of the current window is spent.
    pub free_credits_used: bool,
    /// When the free credit was last spent.
    pub last_free_credit: Option<String>,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.to_string(),
            email: user.email.clone(),
            paid_credits: user.paid_credits,
            free_credits_used: user.free_credits_used,
            last_free_credit: user.last_free_credit.map(|at| at.to_rfc3339()),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Registration request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    /// Optional contact email.
    pub email: Option<String>,
}

/// Register the caller.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let email = body
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(ApiError::BadRequest("email is not valid".into()));
    }

    let user = User::new(auth.user_id, email);
    match state.store.create_user(&user).await {
        Ok(()) => {}
        Err(StoreError::Conflict(_)) => {
            return Err(ApiError::Conflict("User already exists".into()));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(user_id = %auth.user_id, "User registered");

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// Get the caller.
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.ledger.require_user(&auth.user_id).await?;
    Ok(Json(UserResponse::from(&user)))
}
