//! Authentication extractors.
//!
//! - `AuthUser` - end-user authentication via an HS256 JWT
//! - `AdminAuth` - admin authentication via the `x-admin-key` header

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use image_lab_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated user extracted from a bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
    /// The raw subject claim from the JWT.
    pub subject: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        // Test tokens are only honored in test builds or with `test-auth`.
        #[cfg(any(test, feature = "test-auth"))]
        if let Some(user_id_str) = token.strip_prefix("test-token:") {
            let user_id = user_id_str
                .parse::<UserId>()
                .map_err(|_| ApiError::Unauthorized)?;

            return Ok(AuthUser {
                user_id,
                subject: user_id_str.to_string(),
            });
        }

        let claims = validate_jwt(token, state)?;

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthUser {
            user_id,
            subject: claims.sub,
        })
    }
}

/// Admin authentication via API key.
///
/// Requires the `X-Admin-Key` header to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(admin_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth { admin_id })
    }
}

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Audience (string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
}

/// Validate an HS256 token against the configured secret and audience.
fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let Some(secret) = state.config.jwt_secret.as_deref() else {
        tracing::warn!("JWT_SECRET not configured - rejecting bearer token");
        return Err(ApiError::Unauthorized);
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[&state.config.auth_audience]);

    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use image_lab_store::MemoryStore;

    use super::*;
    use crate::config::ServiceConfig;

    fn state() -> Arc<AppState> {
        let config = ServiceConfig {
            jwt_secret: Some("secret".into()),
            admin_api_key: Some("admin-key".into()),
            ..ServiceConfig::default()
        };
        Arc::new(AppState::new(Arc::new(MemoryStore::new()), config))
    }

    fn token(sub: &str, aud: &str, secret: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: sub.to_string(),
            aud: Some(aud.into()),
            exp: now + 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn parts(header: &str, value: &str) -> Parts {
        Request::builder()
            .header(header, value)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[tokio::test]
    async fn accepts_valid_jwt() {
        let state = state();
        let user_id = UserId::generate();
        let mut parts = parts(
            "authorization",
            &format!("Bearer {}", token(&user_id.to_string(), "image-lab", "secret")),
        );
        let user = AuthUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.user_id, user_id);
    }

    #[tokio::test]
    async fn rejects_wrong_secret_or_audience() {
        let state = state();
        let sub = UserId::generate().to_string();
        for bad in [token(&sub, "image-lab", "other"), token(&sub, "elsewhere", "secret")] {
            let mut parts = parts("authorization", &format!("Bearer {bad}"));
            let err = AuthUser::from_request_parts(&mut parts, &state)
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::Unauthorized));
        }
    }

    #[tokio::test]
    async fn test_token_works_in_tests() {
        let state = state();
        let user_id = UserId::generate();
        let mut parts = parts("authorization", &format!("Bearer test-token:{user_id}"));
        let user = AuthUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.user_id, user_id);
    }

    #[tokio::test]
    async fn admin_key_must_match() {
        let state = state();
        let mut good = parts("x-admin-key", "admin-key");
        assert!(AdminAuth::from_request_parts(&mut good, &state).await.is_ok());

        let mut bad = parts("x-admin-key", "nope");
        assert!(AdminAuth::from_request_parts(&mut bad, &state).await.is_err());
    }
}
