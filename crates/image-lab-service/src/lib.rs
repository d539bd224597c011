//! Image-lab HTTP API service.
//!
//! This crate provides the HTTP API for image-lab, including:
//!
//! - User registration and the credit ledger
//! - Image uploads and transformations (OpenAI or product webhook, with a
//!   tagged simulation fallback)
//! - Prompt enhancement
//! - Payment webhooks
//! - The retention sweeper
//!
//! # Authentication
//!
//! 1. **HS256 JWT tokens** - for end-user requests
//! 2. **Admin API key** - for privileged endpoints
//! 3. **HMAC signatures** - for payment webhooks

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod retention;
pub mod routes;
pub mod state;
pub mod transform;
pub mod uploads;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use ledger::{ChargeSubject, CreditLedger, CreditSummary, Settlement};
pub use retention::{RetentionPolicy, RetentionSweeper, SweepReport};
pub use routes::create_router;
pub use state::AppState;
pub use transform::{OpenAiClient, ProductWebhookClient, TransformError, TransformationInvoker};
pub use uploads::{UploadError, UploadStore};
