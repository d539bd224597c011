//! Transformation invoker with tagged simulation fallback.

use std::sync::Arc;

use chrono::Utc;

use image_lab_core::{Backend, ResultMode, TransformResult, UserId};

use super::{ImageTransformer, TransformError, TransformOutput, TransformRequest};
use crate::uploads::{UploadError, UploadStore};

/// One invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest<'a> {
    /// Owner of the input image; generated files go to their directory.
    pub user_id: UserId,
    /// Input image path relative to the uploads root.
    pub input_path: &'a str,
    /// Rendered prompt.
    pub prompt: &'a str,
    /// Catalog id or `custom`.
    pub transformation_type: &'a str,
    /// Preferred backend.
    pub backend: Backend,
    /// Industry context.
    pub industry: Option<&'a str>,
    /// Output size.
    pub size: Option<&'a str>,
    /// Skip the external call.
    pub simulate: bool,
}

/// Outcome of an invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Result descriptor.
    pub result: TransformResult,
    /// Stored output paths (relative) or remote URLs; empty when simulated.
    pub output_paths: Vec<String>,
}

/// Runs transformations against the configured backends.
#[derive(Clone)]
pub struct TransformationInvoker {
    uploads: UploadStore,
    openai: Option<Arc<dyn ImageTransformer>>,
    product_webhook: Option<Arc<dyn ImageTransformer>>,
}

fn simulated(original_url: &str, prompt: &str, mode: ResultMode) -> Invocation {
    Invocation {
        result: TransformResult {
            original_url: original_url.to_string(),
            transformed_url: original_url.to_string(),
            prompt: prompt.to_string(),
            mode,
            created_at: Utc::now(),
        },
        output_paths: Vec::new(),
    }
}

impl TransformationInvoker {
    /// Create an invoker. Missing backends make the invoker simulate.
    #[must_use]
    pub fn new(
        uploads: UploadStore,
        openai: Option<Arc<dyn ImageTransformer>>,
        product_webhook: Option<Arc<dyn ImageTransformer>>,
    ) -> Self {
        Self {
            uploads,
            openai,
            product_webhook,
        }
    }

    /// Whether any backend is configured.
    #[must_use]
    pub fn has_backend(&self) -> bool {
        self.openai.is_some() || self.product_webhook.is_some()
    }

    fn backend_for(&self, backend: Backend) -> Option<&Arc<dyn ImageTransformer>> {
        match backend {
            Backend::OpenAiEdit => self.openai.as_ref(),
            Backend::ProductWebhook => self.product_webhook.as_ref().or(self.openai.as_ref()),
        }
    }

    /// Run one transformation.
    ///
    /// Backend failures of any kind produce a simulated result tagged
    /// `fallback`, with the original image standing in for the output.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Source`] if the original image cannot be
    /// read, since then no fallback exists.
    pub async fn invoke(
        &self,
        request: &InvocationRequest<'_>,
    ) -> Result<Invocation, TransformError> {
        let image = self.uploads.read(request.input_path).await?;
        let original_url = self.uploads.url_for(request.input_path);

        if request.simulate {
            tracing::info!(
                user_id = %request.user_id,
                transformation_type = %request.transformation_type,
                "Simulated transformation requested"
            );
            return Ok(simulated(&original_url, request.prompt, ResultMode::requested()));
        }

        let Some(backend) = self.backend_for(request.backend) else {
            tracing::warn!(
                transformation_type = %request.transformation_type,
                "No image backend configured - simulating"
            );
            return Ok(simulated(
                &original_url,
                request.prompt,
                ResultMode::fallback("no image backend configured"),
            ));
        };

        let file_name = request
            .input_path
            .rsplit('/')
            .next()
            .unwrap_or(request.input_path)
            .to_string();
        let backend_request = TransformRequest {
            image,
            content_type: UploadStore::content_type_for(&file_name),
            file_name,
            image_url: original_url.clone(),
            prompt: request.prompt.to_string(),
            transformation_type: request.transformation_type.to_string(),
            industry: request.industry.map(str::to_string),
            size: request.size.map(str::to_string),
        };

        let output = match backend.transform(&backend_request).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    backend = backend.name(),
                    error = %e,
                    "Transformation backend failed - falling back to original image"
                );
                return Ok(simulated(
                    &original_url,
                    request.prompt,
                    ResultMode::fallback(e.to_string()),
                ));
            }
        };

        let output_path = match self.store_output(&request.user_id, output).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to store transformation output - falling back");
                return Ok(simulated(
                    &original_url,
                    request.prompt,
                    ResultMode::fallback(e.to_string()),
                ));
            }
        };

        tracing::info!(
            user_id = %request.user_id,
            backend = backend.name(),
            output = %output_path,
            "Transformation completed"
        );

        Ok(Invocation {
            result: TransformResult {
                original_url,
                transformed_url: self.uploads.url_for(&output_path),
                prompt: request.prompt.to_string(),
                mode: ResultMode::Real,
                created_at: Utc::now(),
            },
            output_paths: vec![output_path],
        })
    }

    async fn store_output(
        &self,
        user_id: &UserId,
        output: TransformOutput,
    ) -> Result<String, UploadError> {
        match output {
            TransformOutput::Image { data, extension } => {
                self.uploads.save(user_id, &data, extension).await
            }
            TransformOutput::Url(url) => Ok(url),
        }
    }
}
