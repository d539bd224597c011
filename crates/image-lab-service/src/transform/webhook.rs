//! Client for the product-enhancement webhook.
//!
//! The webhook receives the original image (as URL and base64) with the
//! rendered prompt and answers with either a hosted result URL or base64
//! image data. Calls are bounded by `webhook_timeout_seconds`.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{sniff_extension, ImageTransformer, TransformError, TransformOutput, TransformRequest};

/// Product webhook HTTP client.
#[derive(Debug, Clone)]
pub struct ProductWebhookClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    image_url: &'a str,
    image_base64: String,
    content_type: &'a str,
    prompt: &'a str,
    transformation_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    industry: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookReply {
    #[serde(
        default,
        alias = "transformedImageUrl",
        alias = "transformed_image_url",
        alias = "imageUrl",
        alias = "image_url",
        alias = "output_url",
        alias = "url"
    )]
    transformed_url: Option<String>,
    #[serde(default, alias = "imageBase64", alias = "b64_json")]
    image_base64: Option<String>,
}

impl ProductWebhookClient {
    /// Create a client posting to `url` with the given timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransformError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Send one image to the webhook.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures (including the timeout),
    /// non-success statuses and replies without a result.
    pub async fn enhance(&self, request: &TransformRequest) -> Result<TransformOutput, TransformError> {
        let payload = WebhookPayload {
            image_url: &request.image_url,
            image_base64: STANDARD.encode(&request.image),
            content_type: request.content_type,
            prompt: &request.prompt,
            transformation_type: &request.transformation_type,
            industry: request.industry.as_deref(),
            size: request.size.as_deref(),
        };

        let response = self.http.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(TransformError::from_response(response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
        parse_reply(body)
    }
}

/// Interpret a webhook reply; list replies use their first element.
fn parse_reply(body: serde_json::Value) -> Result<TransformOutput, TransformError> {
    let body = match body {
        serde_json::Value::Array(items) => items.into_iter().next().unwrap_or_default(),
        other => other,
    };
    let reply: WebhookReply = serde_json::from_value(body)
        .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;

    if let Some(url) = reply.transformed_url.filter(|u| !u.is_empty()) {
        return Ok(TransformOutput::Url(url));
    }
    if let Some(encoded) = reply.image_base64.filter(|b| !b.is_empty()) {
        let encoded = encoded
            .split_once("base64,")
            .map_or(encoded.as_str(), |(_, data)| data);
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|e| TransformError::InvalidResponse(format!("bad base64: {e}")))?;
        return Ok(TransformOutput::Image {
            extension: sniff_extension(&data),
            data,
        });
    }
    Err(TransformError::InvalidResponse(
        "webhook reply carries no image".into(),
    ))
}

#[async_trait]
impl ImageTransformer for ProductWebhookClient {
    fn name(&self) -> &'static str {
        "product-webhook"
    }

    async fn transform(&self, request: &TransformRequest) -> Result<TransformOutput, TransformError> {
        self.enhance(request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> TransformRequest {
        TransformRequest {
            image: b"original".to_vec(),
            file_name: "in.png".into(),
            content_type: "image/png",
            image_url: "http://lab.test/uploads/u/in.png".into(),
            prompt: "pure white background".into(),
            transformation_type: "white-background".into(),
            industry: Some("jewelry".into()),
            size: None,
        }
    }

    #[test]
    fn reply_url_aliases() {
        for key in ["transformed_url", "transformedImageUrl", "imageUrl", "url"] {
            let mut reply = serde_json::Map::new();
            reply.insert(key.to_string(), json!("https://x/y.png"));
            let output = parse_reply(serde_json::Value::Object(reply)).unwrap();
            assert_eq!(output, TransformOutput::Url("https://x/y.png".into()));
        }
    }

    #[test]
    fn reply_list_and_data_uri() {
        let encoded = STANDARD.encode(b"\xFF\xD8\xFFjpeg");
        let output =
            parse_reply(json!([{ "image_base64": format!("data:image/jpeg;base64,{encoded}") }]))
                .unwrap();
        assert_eq!(
            output,
            TransformOutput::Image {
                data: b"\xFF\xD8\xFFjpeg".to_vec(),
                extension: "jpg"
            }
        );
    }

    #[test]
    fn reply_without_image_is_invalid() {
        assert!(matches!(
            parse_reply(json!({ "status": "ok" })),
            Err(TransformError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn posts_prompt_and_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "prompt": "pure white background",
                "transformation_type": "white-background",
                "industry": "jewelry",
                "image_base64": STANDARD.encode(b"original"),
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "url": "https://x/out.png" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client =
            ProductWebhookClient::new(format!("{}/hook", server.uri()), Duration::from_secs(5))
                .unwrap();
        let output = client.enhance(&request()).await.unwrap();
        assert_eq!(output, TransformOutput::Url("https://x/out.png".into()));
    }

    #[tokio::test]
    async fn slow_webhook_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "url": "https://x/out.png" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ProductWebhookClient::new(server.uri(), Duration::from_millis(50)).unwrap();
        let err = client.enhance(&request()).await.unwrap_err();
        assert!(matches!(err, TransformError::Http(_)));
    }
}
