//! Request and response types for the image-lab client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use image_lab_core::{Backend, ChargePlan, TransformResult, Transformation};

/// Credit state of the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditBalance {
    /// Paid credit balance.
    pub paid_credits: i64,
    /// Whether the monthly free credit can be spent now.
    pub free_credit_available: bool,
    /// Whether the free credit of the current window is spent.
    pub free_credits_used: bool,
    /// When the free credit was last spent.
    pub last_free_credit: Option<DateTime<Utc>>,
    /// When the next free credit becomes available.
    pub next_free_credit_at: Option<DateTime<Utc>>,
}

/// Deduction request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeductRequest<'a> {
    pub amount: i64,
    pub transaction_key: &'a str,
    pub transformation_type: &'a str,
    pub test_mode: bool,
}

/// Deduction receipt from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct DeductReceipt {
    /// Paid credits taken.
    pub deducted: i64,
    /// Whether the monthly free credit paid instead.
    pub used_free_credit: bool,
    /// Whether test mode skipped the deduction.
    pub test_mode: bool,
    /// Paid balance afterwards.
    pub paid_credits: i64,
    /// Echo of the transaction key.
    pub transaction_key: Option<String>,
}

/// Outcome of a guarded deduction.
#[derive(Debug, Clone)]
pub enum Deduction {
    /// The server applied the deduction.
    Deducted(DeductReceipt),
    /// This session already deducted for the key; no request was sent.
    AlreadyDeducted,
}

/// One catalog option.
#[derive(Debug, Clone, Deserialize)]
pub struct Enhancement {
    /// Option id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Industry tags.
    pub industries: Vec<String>,
    /// Credit cost.
    pub cost: i64,
    /// Backend that runs the option.
    pub backend: Backend,
}

/// Catalog listing.
#[derive(Debug, Clone, Deserialize)]
pub struct EnhancementsResponse {
    /// Industry filter applied, if any.
    pub industry: Option<String>,
    /// Options for that industry.
    pub enhancements: Vec<Enhancement>,
}

/// Transformation request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformationRequest {
    /// Input image path as returned by the upload endpoint.
    pub image_path: String,
    /// Catalog option to apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhancement_id: Option<String>,
    /// Free-text prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Industry context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Output size, e.g. `1024x1024`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Skip charging.
    pub test_mode: bool,
    /// Skip the backend call.
    pub simulate: bool,
}

impl TransformationRequest {
    /// Request a catalog option.
    #[must_use]
    pub fn enhancement(image_path: impl Into<String>, enhancement_id: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            enhancement_id: Some(enhancement_id.into()),
            ..Self::default()
        }
    }

    /// Request a free-text prompt.
    #[must_use]
    pub fn prompt(image_path: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }
}

/// A transformation with public URLs.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformationView {
    /// The record.
    #[serde(flatten)]
    pub transformation: Transformation,
    /// URL of the input image.
    pub input_url: String,
    /// URLs of the outputs.
    pub output_urls: Vec<String>,
}

/// How a transformation was paid for.
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    /// The applied plan.
    pub plan: ChargePlan,
    /// Paid credits taken.
    pub credits_charged: i64,
    /// Paid balance afterwards.
    pub paid_credits: i64,
}

/// Transformation response.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformationResponse {
    /// The finished record.
    pub transformation: TransformationView,
    /// Result descriptor.
    pub result: TransformResult,
    /// Charge applied.
    pub charge: Charge,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
