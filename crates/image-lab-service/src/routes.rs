//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    admin, catalog, config, credits, health, prompts, transformations, uploads, users, webhooks,
};
use crate::state::AppState;
use crate::uploads::UPLOADS_ROUTE;

/// Maximum concurrent requests that call external image backends.
const TRANSFORM_MAX_CONCURRENT_REQUESTS: usize = 16;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Room above `max_body_bytes` for multipart boundaries and part headers,
/// so an oversized file reaches the upload handler's own size check.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Liveness
/// - `GET /ready` - Readiness (store ping)
/// - `GET /v1/config` - Configuration introspection
/// - `GET /v1/enhancements?industry=` - Catalog lookup
/// - `GET /v1/industries/match?q=` - Fuzzy industry match
/// - `GET /uploads/*` - Stored images
///
/// ## Users and credits (JWT auth)
/// - `POST /v1/users`, `GET /v1/users/me`
/// - `GET /v1/credits`, `POST /v1/credits/deduct`, `GET /v1/credits/transactions`
///
/// ## Images (JWT auth)
/// - `POST /v1/uploads` - Multipart upload
/// - `POST /v1/transformations`, `GET /v1/transformations`
/// - `GET /v1/transformations/:id`, `POST /v1/transformations/:id/edits`
/// - `POST /v1/prompts/enhance`
///
/// ## Admin (`x-admin-key`)
/// - `PUT /v1/admin/users/:id/credits`
/// - `POST /v1/admin/users/:id/credits/grant`
/// - `POST /v1/admin/retention/sweep`
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payments`
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let body_limit = state
        .config
        .max_body_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let request_timeout_seconds = state.config.request_timeout_seconds;
    let uploads_dir = state.config.uploads_dir.clone();

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Routes that reach OpenAI or the product webhook get a tighter limit.
    let transform_routes = Router::new()
        .route(
            "/",
            post(transformations::create_transformation)
                .get(transformations::list_transformations),
        )
        .route("/:id", get(transformations::get_transformation))
        .route("/:id/edits", post(transformations::edit_transformation))
        .layer(ConcurrencyLimitLayer::new(TRANSFORM_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Catalog
        .route("/config", get(config::get_config))
        .route("/enhancements", get(catalog::list_enhancements))
        .route("/industries/match", get(catalog::match_industry_handler))
        // Users
        .route("/users", post(users::create_user))
        .route("/users/me", get(users::get_me))
        // Credits
        .route("/credits", get(credits::get_credits))
        .route("/credits/deduct", post(credits::deduct_credits))
        .route("/credits/transactions", get(credits::list_transactions))
        // Images
        .route("/uploads", post(uploads::upload_image))
        .route("/prompts/enhance", post(prompts::enhance_prompt))
        .nest("/transformations", transform_routes)
        // Admin
        .route("/admin/users/:id/credits", put(admin::set_user_credits))
        .route("/admin/users/:id/credits/grant", post(admin::grant_credits))
        .route("/admin/retention/sweep", post(admin::run_retention_sweep))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the payment provider)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .nest_service(UPLOADS_ROUTE, ServeDir::new(uploads_dir))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
