//! Image upload handler.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use image_lab_core::{ImageId, UserImage};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::uploads::{UploadError, UploadStore};

/// Multipart field carrying the image.
const FILE_FIELD: &str = "file";

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Image ID.
    pub id: String,
    /// Path relative to the uploads root; pass this as `image_path`.
    pub path: String,
    /// Public URL.
    pub url: String,
    /// MIME type.
    pub content_type: String,
    /// Size in bytes.
    pub size_bytes: i64,
}

/// Upload one image as multipart field `file`.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    state.ledger.require_user(&auth.user_id).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let original_name = field.file_name().map(str::to_string);
        let declared_type = field.content_type().map(str::to_string);
        let extension =
            UploadStore::extension_for(original_name.as_deref(), declared_type.as_deref())?;

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;

        let max = state.config.max_body_bytes;
        if data.len() > max {
            return Err(UploadError::TooLarge {
                size: data.len(),
                max,
            }
            .into());
        }

        let path = state.uploads.save(&auth.user_id, &data, extension).await?;
        let image = UserImage {
            id: ImageId::generate(),
            user_id: auth.user_id,
            path: path.clone(),
            original_name,
            content_type: UploadStore::content_type_for(&path).to_string(),
            size_bytes: i64::try_from(data.len()).unwrap_or(i64::MAX),
            created_at: Utc::now(),
        };

        if let Err(e) = state.store.put_user_image(&image).await {
            if let Err(cleanup) = state.uploads.delete(&path).await {
                tracing::warn!(path = %path, error = %cleanup, "Failed to remove unrecorded upload");
            }
            return Err(e.into());
        }

        tracing::info!(
            user_id = %auth.user_id,
            image_id = %image.id,
            path = %path,
            size_bytes = image.size_bytes,
            "Image uploaded"
        );

        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                id: image.id.to_string(),
                url: state.uploads.url_for(&path),
                path,
                content_type: image.content_type,
                size_bytes: image.size_bytes,
            }),
        ));
    }

    Err(ApiError::BadRequest(format!(
        "multipart field '{FILE_FIELD}' is required"
    )))
}
