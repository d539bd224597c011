//! Application state.

use std::sync::Arc;
use std::time::Duration;

use image_lab_store::Store;

use crate::config::ServiceConfig;
use crate::ledger::CreditLedger;
use crate::retention::{RetentionPolicy, RetentionSweeper};
use crate::transform::{
    ImageTransformer, OpenAiClient, ProductWebhookClient, PromptEnhancer, TransformationInvoker,
};
use crate::uploads::UploadStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Local file storage for uploads and generated images.
    pub uploads: UploadStore,

    /// Credit ledger.
    pub ledger: CreditLedger,

    /// OpenAI client (optional).
    pub openai: Option<Arc<OpenAiClient>>,

    /// Product-enhancement webhook client (optional).
    pub product_webhook: Option<Arc<ProductWebhookClient>>,

    /// Transformation invoker over the configured backends.
    pub invoker: TransformationInvoker,

    /// Prompt enhancer.
    pub prompts: PromptEnhancer,

    /// Retention sweeper, shared by the background task and the admin route.
    pub sweeper: Arc<RetentionSweeper>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let uploads = UploadStore::new(config.uploads_dir.clone(), config.public_base_url.clone());

        let openai = config.openai_api_key.as_ref().and_then(|key| {
            match OpenAiClient::new(key, &config) {
                Ok(client) => {
                    tracing::info!(
                        base_url = %config.openai_base_url,
                        model = %config.openai_image_model,
                        "OpenAI integration enabled"
                    );
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create OpenAI client");
                    None
                }
            }
        });

        if openai.is_none() {
            tracing::warn!("OpenAI not configured - transformations will be simulated");
        }

        let product_webhook = config.product_webhook_url.as_ref().and_then(|url| {
            match ProductWebhookClient::new(
                url.clone(),
                Duration::from_secs(config.webhook_timeout_seconds),
            ) {
                Ok(client) => {
                    tracing::info!(url = %url, "Product webhook enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create product webhook client");
                    None
                }
            }
        });

        if product_webhook.is_none() {
            tracing::warn!("Product webhook not configured - product options use OpenAI");
        }

        let invoker = TransformationInvoker::new(
            uploads.clone(),
            openai
                .clone()
                .map(|client| client as Arc<dyn ImageTransformer>),
            product_webhook
                .clone()
                .map(|client| client as Arc<dyn ImageTransformer>),
        );

        let sweeper = Arc::new(RetentionSweeper::new(
            store.clone(),
            uploads.clone(),
            RetentionPolicy::from_config(&config),
        ));

        Self {
            ledger: CreditLedger::new(store.clone()),
            prompts: PromptEnhancer::new(openai.clone()),
            store,
            config,
            uploads,
            openai,
            product_webhook,
            invoker,
            sweeper,
        }
    }

    /// Check if OpenAI is configured.
    #[must_use]
    pub fn has_openai(&self) -> bool {
        self.openai.is_some()
    }

    /// Check if the product webhook is configured.
    #[must_use]
    pub fn has_product_webhook(&self) -> bool {
        self.product_webhook.is_some()
    }
}
