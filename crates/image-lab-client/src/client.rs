//! Image-lab HTTP client implementation.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use image_lab_core::{DeductionGuard, TransactionKey};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, CreditBalance, DeductReceipt, DeductRequest, Deduction,
    EnhancementsResponse, TransformationRequest, TransformationResponse, TransformationView,
};

/// Image-lab API client acting for one user.
///
/// Clones share the deduction guard, so a key claimed through one clone is
/// claimed for all of them.
#[derive(Debug, Clone)]
pub struct ImageLabClient {
    client: Client,
    base_url: String,
    token: String,
    guard: Arc<DeductionGuard>,
}

impl ImageLabClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the image-lab service (e.g., `"http://image-lab:8080"`)
    /// * `token` - The user's bearer token
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, token, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        token: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            guard: Arc::new(DeductionGuard::new()),
        })
    }

    /// Whether this session has already deducted for `key`.
    #[must_use]
    pub fn is_deducted(&self, key: &TransactionKey) -> bool {
        self.guard.is_claimed(key)
    }

    /// Get the caller's credit state.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_credits(&self) -> Result<CreditBalance, ClientError> {
        let url = format!("{}/v1/credits", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Deduct credits once per transaction key.
    ///
    /// A key already deducted in this session returns
    /// [`Deduction::AlreadyDeducted`] without a request. The key is released
    /// for a retry only when the server definitely rejected the deduction
    /// (see [`ClientError::is_rejection`]); after an ambiguous failure it
    /// stays claimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn deduct_credits(
        &self,
        key: &TransactionKey,
        transformation_type: &str,
        amount: i64,
        test_mode: bool,
    ) -> Result<Deduction, ClientError> {
        if !self.guard.try_claim(key) {
            tracing::debug!(transaction_key = %key, "Deduction already made for key");
            return Ok(Deduction::AlreadyDeducted);
        }

        match self
            .send_deduction(key, transformation_type, amount, test_mode)
            .await
        {
            Ok(receipt) => Ok(Deduction::Deducted(receipt)),
            Err(e) if e.is_rejection() => {
                self.guard.release(key);
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    transaction_key = %key,
                    error = %e,
                    "Deduction outcome unknown, keeping key claimed"
                );
                Err(e)
            }
        }
    }

    async fn send_deduction(
        &self,
        key: &TransactionKey,
        transformation_type: &str,
        amount: i64,
        test_mode: bool,
    ) -> Result<DeductReceipt, ClientError> {
        let url = format!("{}/v1/credits/deduct", self.base_url);
        let request = DeductRequest {
            amount,
            transaction_key: key.as_str(),
            transformation_type,
            test_mode,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List catalog options, optionally for one industry.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_enhancements(
        &self,
        industry: Option<&str>,
    ) -> Result<EnhancementsResponse, ClientError> {
        let url = format!("{}/v1/enhancements", self.base_url);

        let mut request = self.client.get(&url);
        if let Some(industry) = industry {
            request = request.query(&[("industry", industry)]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// Request a transformation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn request_transformation(
        &self,
        request: &TransformationRequest,
    ) -> Result<TransformationResponse, ClientError> {
        let url = format!("{}/v1/transformations", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get one of the caller's transformations.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_transformation(&self, id: &str) -> Result<TransformationView, ClientError> {
        let url = format!("{}/v1/transformations/{id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }

        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let message = api_error.error.message;
                let detail = |name: &str| {
                    api_error
                        .error
                        .details
                        .as_ref()
                        .and_then(|d| d.get(name))
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0)
                };

                match api_error.error.code.as_str() {
                    "insufficient_credits" => Err(ClientError::InsufficientCredits {
                        balance: detail("balance"),
                        required: detail("required"),
                    }),
                    "unauthorized" => Err(ClientError::Unauthorized),
                    "not_found" => Err(ClientError::NotFound(message)),
                    code => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}
