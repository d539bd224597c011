//! External image transformation backends and the invoker that drives them.
//!
//! - [`OpenAiClient`]: OpenAI image edits and chat completions
//! - [`ProductWebhookClient`]: the product-enhancement webhook
//! - [`TransformationInvoker`]: picks a backend, runs it and falls back to a
//!   tagged simulation when it fails

mod invoker;
mod openai;
mod prompt;
mod webhook;

use async_trait::async_trait;

pub use invoker::{Invocation, InvocationRequest, TransformationInvoker};
pub use openai::OpenAiClient;
pub use prompt::{local_enhancement, EnhancedPrompt, PromptEnhancer, PromptMode};
pub use webhook::ProductWebhookClient;

use crate::uploads::UploadError;

/// Errors raised by external transformation backends.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// HTTP request failed (connect, timeout, body).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The original image could not be read; no fallback is possible.
    #[error("original image unavailable: {0}")]
    Source(#[from] UploadError),
}

impl TransformError {
    /// Build a status error from a failed response, keeping a bounded
    /// excerpt of the body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body = body.chars().take(500).collect();
        Self::Status { status, body }
    }
}

/// Input handed to a backend.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// Bytes of the original image.
    pub image: Vec<u8>,
    /// File name of the original image.
    pub file_name: String,
    /// MIME type of the original image.
    pub content_type: &'static str,
    /// Public URL of the original image.
    pub image_url: String,
    /// Rendered prompt.
    pub prompt: String,
    /// Transformation type (catalog id or `custom`).
    pub transformation_type: String,
    /// Industry the request was made for.
    pub industry: Option<String>,
    /// Requested output size, e.g. `1024x1024`.
    pub size: Option<String>,
}

/// What a backend produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutput {
    /// Image bytes to be stored locally.
    Image {
        /// Encoded image.
        data: Vec<u8>,
        /// File extension of the encoding.
        extension: &'static str,
    },
    /// A URL hosted by the backend.
    Url(String),
}

/// An external service that transforms images.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Run one transformation.
    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput, TransformError>;
}

/// Guess the encoding of image bytes from their magic number.
#[must_use]
pub fn sniff_extension(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "png",
        [0xFF, 0xD8, 0xFF, ..] => "jpg",
        [b'G', b'I', b'F', b'8', ..] => "gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
        _ => "png",
    }
}
