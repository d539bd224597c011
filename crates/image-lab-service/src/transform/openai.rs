//! OpenAI API client (image edits and chat completions).

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::{sniff_extension, ImageTransformer, TransformError, TransformOutput, TransformRequest};
use crate::config::ServiceConfig;

/// OpenAI HTTP client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    image_model: String,
    chat_model: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: &str, config: &ServiceConfig) -> Result<Self, TransformError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.openai_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            image_model: config.openai_image_model.clone(),
            chat_model: config.openai_chat_model.clone(),
        })
    }

    /// Run an image edit. Base64 results are decoded; URL results are
    /// returned as given.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, non-success statuses and
    /// responses without an image.
    pub async fn edit_image(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformOutput, TransformError> {
        let image = Part::bytes(request.image.clone())
            .file_name(request.file_name.clone())
            .mime_str(request.content_type)?;

        let mut form = Form::new()
            .text("model", self.image_model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", "1")
            .part("image", image);
        if let Some(size) = &request.size {
            form = form.text("size", size.clone());
        }

        let url = format!("{}/v1/images/edits", self.base_url);
        tracing::debug!(url = %url, model = %self.image_model, "Calling OpenAI image edit");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransformError::from_response(response).await);
        }

        let body: ImagesResponse = response
            .json()
            .await
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
        let image = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| TransformError::InvalidResponse("no image in response".into()))?;

        match (image.b64_json, image.url) {
            (Some(encoded), _) => {
                let data = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| TransformError::InvalidResponse(format!("bad base64: {e}")))?;
                Ok(TransformOutput::Image {
                    extension: sniff_extension(&data),
                    data,
                })
            }
            (None, Some(url)) => Ok(TransformOutput::Url(url)),
            (None, None) => Err(TransformError::InvalidResponse(
                "image carries neither b64_json nor url".into(),
            )),
        }
    }

    /// Run a chat completion and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, non-success statuses and
    /// empty replies.
    pub async fn complete_chat(&self, system: &str, user: &str) -> Result<String, TransformError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.7,
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransformError::from_response(response).await);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| TransformError::InvalidResponse("empty completion".into()))
    }
}

#[async_trait]
impl ImageTransformer for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput, TransformError> {
        self.edit_image(request).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> OpenAiClient {
        let config = ServiceConfig {
            openai_base_url: server.uri(),
            openai_timeout_seconds: 5,
            ..ServiceConfig::default()
        };
        OpenAiClient::new("sk-test", &config).unwrap()
    }

    fn request() -> TransformRequest {
        TransformRequest {
            image: b"\x89PNG\r\n\x1a\noriginal".to_vec(),
            file_name: "in.png".into(),
            content_type: "image/png",
            image_url: "/uploads/u/in.png".into(),
            prompt: "make it a cartoon".into(),
            transformation_type: "cartoon-style".into(),
            industry: None,
            size: Some("1024x1024".into()),
        }
    }

    #[tokio::test]
    async fn edit_decodes_base64_image() {
        let server = MockServer::start().await;
        let png = b"\x89PNG\r\n\x1a\nresult".to_vec();
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "b64_json": STANDARD.encode(&png) }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = client(&server).edit_image(&request()).await.unwrap();
        assert_eq!(
            output,
            TransformOutput::Image {
                data: png,
                extension: "png"
            }
        );
    }

    #[tokio::test]
    async fn edit_returns_url_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "url": "https://cdn.example.com/out.png" }]
            })))
            .mount(&server)
            .await;

        let output = client(&server).edit_image(&request()).await.unwrap();
        assert_eq!(
            output,
            TransformOutput::Url("https://cdn.example.com/out.png".into())
        );
    }

    #[tokio::test]
    async fn edit_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client(&server).edit_image(&request()).await.unwrap_err();
        assert!(matches!(err, TransformError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn chat_returns_trimmed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "  A bright studio shot.  " } }]
            })))
            .mount(&server)
            .await;

        let reply = client(&server)
            .complete_chat("system", "a shot")
            .await
            .unwrap();
        assert_eq!(reply, "A bright studio shot.");
    }
}
