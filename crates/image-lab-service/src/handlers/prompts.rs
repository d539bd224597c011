//! Prompt enhancement handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::transform::EnhancedPrompt;

/// Longest prompt accepted.
const MAX_PROMPT_CHARS: usize = 2000;

/// Enhancement request.
#[derive(Debug, Deserialize)]
pub struct EnhancePromptRequest {
    /// The prompt to rewrite.
    pub prompt: String,
    /// Industry context.
    pub industry: Option<String>,
}

/// Rewrite a prompt for the image model.
pub async fn enhance_prompt(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<EnhancePromptRequest>,
) -> Result<Json<EnhancedPrompt>, ApiError> {
    let prompt = body.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "prompt exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }

    let industry = body
        .industry
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let enhanced = state.prompts.enhance(prompt, industry).await;

    tracing::debug!(user_id = %auth.user_id, mode = ?enhanced.mode, "Prompt enhanced");

    Ok(Json(enhanced))
}
