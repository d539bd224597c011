//! Prompt enhancement through a chat completion, with a local fallback.

use std::sync::Arc;

use serde::Serialize;

use super::OpenAiClient;

const SYSTEM_PROMPT: &str = "You rewrite short requests into detailed prompts for an image \
editing model. Keep the user's intent, add concrete lighting, composition and style details, \
and answer with the prompt only, in at most 80 words.";

const QUALITY_DESCRIPTORS: &str =
    "professional high-resolution photograph, balanced lighting, sharp detail, clean composition";

/// How an enhanced prompt was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Rewritten by the chat model.
    Real,
    /// Produced locally.
    Fallback,
}

/// An enhanced prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnhancedPrompt {
    /// The prompt as submitted.
    pub original: String,
    /// The enhanced prompt.
    pub prompt: String,
    /// Real or fallback.
    pub mode: PromptMode,
    /// Why the fallback was used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Deterministic enhancement: the prompt followed by quality descriptors and
/// the industry, if any.
#[must_use]
pub fn local_enhancement(prompt: &str, industry: Option<&str>) -> String {
    let base = prompt.trim().trim_end_matches(['.', ',', ';']);
    match industry.map(str::trim).filter(|i| !i.is_empty()) {
        Some(industry) => format!("{base}. {QUALITY_DESCRIPTORS}, styled for the {industry} industry."),
        None => format!("{base}. {QUALITY_DESCRIPTORS}."),
    }
}

/// Rewrites prompts, preferring the chat model when configured.
#[derive(Clone)]
pub struct PromptEnhancer {
    openai: Option<Arc<OpenAiClient>>,
}

impl PromptEnhancer {
    /// Create an enhancer; `None` always uses the local fallback.
    #[must_use]
    pub fn new(openai: Option<Arc<OpenAiClient>>) -> Self {
        Self { openai }
    }

    /// Enhance `prompt`. Never fails: errors select the fallback.
    pub async fn enhance(&self, prompt: &str, industry: Option<&str>) -> EnhancedPrompt {
        let fallback = |reason: String| EnhancedPrompt {
            original: prompt.to_string(),
            prompt: local_enhancement(prompt, industry),
            mode: PromptMode::Fallback,
            fallback_reason: Some(reason),
        };

        let Some(openai) = &self.openai else {
            return fallback("no chat backend configured".into());
        };

        let request = match industry {
            Some(industry) => format!("Industry: {industry}\nRequest: {prompt}"),
            None => format!("Request: {prompt}"),
        };
        match openai.complete_chat(SYSTEM_PROMPT, &request).await {
            Ok(enhanced) => EnhancedPrompt {
                original: prompt.to_string(),
                prompt: enhanced,
                mode: PromptMode::Real,
                fallback_reason: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Prompt enhancement failed - using local fallback");
                fallback(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_enhancement_appends_descriptors() {
        assert_eq!(
            local_enhancement("A red sneaker.", None),
            format!("A red sneaker. {QUALITY_DESCRIPTORS}.")
        );
        assert!(local_enhancement("a ring", Some("jewelry")).ends_with("for the jewelry industry."));
        assert_eq!(
            local_enhancement("a ring", Some("  ")),
            local_enhancement("a ring", None)
        );
    }

    #[tokio::test]
    async fn unconfigured_enhancer_falls_back() {
        let enhanced = PromptEnhancer::new(None).enhance("a mug", Some("food")).await;
        assert_eq!(enhanced.mode, PromptMode::Fallback);
        assert_eq!(enhanced.original, "a mug");
        assert_eq!(enhanced.prompt, local_enhancement("a mug", Some("food")));
        assert!(enhanced.fallback_reason.is_some());
    }
}
