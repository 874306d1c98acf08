//! The vision-model seam.
//!
//! The pipeline never talks to a model SDK directly. It holds an
//! `Arc<dyn VisionModel>` handed in through
//! [`crate::config::ConversionConfig`], so tests can substitute a scripted
//! model and deployments can pick a backend without touching the pipeline.
//!
//! Two backends ship with the crate:
//!
//! * [`ProviderModel`] wraps any `edgequake_llm` provider (OpenAI,
//!   Anthropic, Gemini, Mistral, Ollama …).
//! * [`ChatCompletionsModel`] speaks the OpenAI-style `chat/completions`
//!   wire format over `reqwest`. It defaults to Mistral's endpoint and the
//!   `pixtral-large-2411` model.

use crate::pipeline::encode::SegmentPayload;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Mistral's OpenAI-compatible chat endpoint.
pub const MISTRAL_CHAT_ENDPOINT: &str = "https://api.mistral.ai/v1/chat/completions";

/// Model used by [`ChatCompletionsModel`] unless overridden.
pub const DEFAULT_VISION_MODEL: &str = "pixtral-large-2411";

/// Environment variable holding the Mistral API key.
pub const MISTRAL_API_KEY_ENV: &str = "MISTRAL_API_KEY";

/// Why a single model call failed. Every variant is retry-eligible.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// One extraction call: two fixed instructions plus one image.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub system_instruction: &'a str,
    pub user_instruction: &'a str,
    pub image: &'a SegmentPayload,
}

/// The model's answer. `text` may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ExtractionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A vision-language model that can read an image and answer with text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Short label for logs, e.g. `"mistral/pixtral-large-2411"`.
    fn name(&self) -> &str;

    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractionResponse, ModelError>;
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// Adapter from an `edgequake_llm` provider to [`VisionModel`].
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    pub fn with_options(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl VisionModel for ProviderModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractionResponse, ModelError> {
        let image = ImageData::new(request.image.data.clone(), request.image.mime_type.as_str())
            .with_detail("high");

        let messages = vec![
            ChatMessage::system(request.system_instruction),
            ChatMessage::user_with_images(request.user_instruction, vec![image]),
        ];

        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        Ok(ExtractionResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

// ── Direct chat-completions backend ──────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// `chat/completions` client over `reqwest`.
pub struct ChatCompletionsModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    label: String,
    timeout_secs: u64,
    temperature: f32,
    max_tokens: usize,
}

impl ChatCompletionsModel {
    /// Client for `endpoint` using `model`. `api_key` is sent as a bearer
    /// token when present.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        let model = model.into();
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            label: format!("chat/{}", model),
            model,
            timeout_secs: request_timeout.as_secs(),
            temperature: 0.1,
            max_tokens: 4096,
        })
    }

    /// Mistral client keyed from `MISTRAL_API_KEY`; `None` when unset.
    pub fn mistral_from_env(
        model: Option<&str>,
        request_timeout: Duration,
    ) -> Option<Result<Self, ModelError>> {
        let key = std::env::var(MISTRAL_API_KEY_ENV).ok().filter(|k| !k.is_empty())?;
        Some(Self::new(
            MISTRAL_CHAT_ENDPOINT,
            model.unwrap_or(DEFAULT_VISION_MODEL),
            Some(key),
            request_timeout,
        ))
    }

    pub fn with_options(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, request: &ExtractionRequest<'_>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatRequestMessage {
                    role: "system",
                    content: MessageContent::Text(request.system_instruction.to_string()),
                },
                ChatRequestMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: request.user_instruction.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: request.image.data_uri(),
                            },
                        },
                    ]),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Pull the first choice's text out of a response body.
fn parse_chat_response(body: &str) -> Result<ExtractionResponse, ModelError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Malformed(e.to_string()))?;

    let content = parsed
        .choices
        .and_then(|choices| choices.into_iter().next())
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| ModelError::Malformed("no choices in response".to_string()))?;

    let (input_tokens, output_tokens) = parsed
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(ExtractionResponse {
        text: content,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl VisionModel for ChatCompletionsModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractionResponse, ModelError> {
        let body = self.build_request(request);

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                ModelError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!("{}: {} byte response", self.label, text.len());
        parse_chat_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SegmentPayload {
        SegmentPayload {
            data: "iVBORw0KGgo=".into(),
            mime_type: "image/png".into(),
        }
    }

    #[test]
    fn request_matches_chat_completions_shape() {
        let model = ChatCompletionsModel::new(
            MISTRAL_CHAT_ENDPOINT,
            DEFAULT_VISION_MODEL,
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let image = payload();
        let req = ExtractionRequest {
            system_instruction: "sys",
            user_instruction: "usr",
            image: &image,
        };

        let json = serde_json::to_value(model.build_request(&req)).unwrap();
        assert_eq!(json["model"], "pixtral-large-2411");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "sys");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        assert_eq!(json["messages"][1]["content"][0]["text"], "usr");
        assert_eq!(json["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,iVBORw0KGgo="
        );
    }

    #[test]
    fn parses_first_choice() {
        let body = r#"{"choices":[{"message":{"content":"a,b\nc,d"}}],
                       "usage":{"prompt_tokens":812,"completion_tokens":9}}"#;
        let resp = parse_chat_response(body).unwrap();
        assert_eq!(resp.text, "a,b\nc,d");
        assert_eq!(resp.input_tokens, 812);
        assert_eq!(resp.output_tokens, 9);
    }

    #[test]
    fn null_content_is_empty_text() {
        let body = r#"{"choices":[{"message":{"content":null}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap().text, "");
    }

    #[test]
    fn missing_choices_is_malformed() {
        let err = parse_chat_response(r#"{"object":"error"}"#).unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)), "got {err:?}");

        let err = parse_chat_response("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)), "got {err:?}");
    }
}
