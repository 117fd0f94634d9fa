//! OpenRouter provider: OpenAI-compatible `/chat/completions` over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const PROVIDER: &str = "openrouter";

/// HTTP timeout for a single completion request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    /// OpenRouter reports some upstream failures inside a 200 body.
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

impl ApiErrorBody {
    fn is_rate_limit(&self) -> bool {
        let code_429 = match &self.code {
            Some(serde_json::Value::Number(n)) => n.as_u64() == Some(429),
            Some(serde_json::Value::String(s)) => s == "429",
            _ => false,
        };
        code_429 || self.message.to_lowercase().contains("rate limit")
    }
}

/// OpenRouter chat-completions client.
pub struct OpenRouterProvider {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenRouterProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn api_error(body: ApiErrorBody, status: Option<StatusCode>, retry: Option<Duration>) -> LlmError {
    if body.is_rate_limit() || status == Some(StatusCode::TOO_MANY_REQUESTS) {
        LlmError::RateLimited {
            provider: PROVIDER.into(),
            retry_after: retry,
        }
    } else {
        let status = status.map(|s| s.as_u16().to_string()).unwrap_or_else(|| "200".into());
        LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: format!("API error ({status}): {}", body.message),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = ChatCompletionRequest {
            model,
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
        };

        debug!(model = %model, messages = request.messages.len(), "Sending completion request");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.api_key.expose_secret())
            .header("HTTP-Referer", "https://github.com/yoga-assist")
            .header("X-Title", "Yoga Assist")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to send request: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited {
                    provider: PROVIDER.into(),
                    retry_after: retry,
                });
            }
            return Err(match serde_json::from_str::<ApiError>(&error_text) {
                Ok(parsed) => api_error(parsed.error, Some(status), retry),
                Err(_) => LlmError::RequestFailed {
                    provider: PROVIDER.into(),
                    reason: format!("API error ({}): {error_text}", status.as_u16()),
                },
            });
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("Failed to parse response: {e}"),
            })?;

        if let Some(err) = completion.error {
            return Err(api_error(err, None, None));
        }

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "No choices in response".into(),
            })?;

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "Empty completion".into(),
            });
        }

        let usage = completion.usage.unwrap_or(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(CompletionResponse {
            content,
            model: completion.model.unwrap_or_else(|| model.to_string()),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            api_key: SecretString::from("sk-or-test".to_string()),
            base_url: "https://openrouter.ai/api/v1".into(),
            model: "anthropic/claude-3.5-sonnet".into(),
            max_tokens: 2000,
            temperature: 0.7,
            generation_timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn completions_url_joins_base() {
        let provider = OpenRouterProvider::new(&config()).unwrap();
        assert_eq!(
            provider.completions_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(provider.model_name(), "anthropic/claude-3.5-sonnet");
    }

    #[test]
    fn request_serializes_openai_shape() {
        let messages = vec![ChatMessage::system("be calm"), ChatMessage::user("hi")];
        let body = ChatCompletionRequest {
            model: "m",
            messages: &messages,
            max_tokens: 10,
            temperature: 0.5,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn in_body_rate_limit_detected() {
        let body: ChatCompletionResponse = serde_json::from_str(
            r#"{"error": {"code": 429, "message": "Provider returned error"}}"#,
        )
        .unwrap();
        let err = api_error(body.error.unwrap(), None, None);
        assert!(matches!(err, LlmError::RateLimited { .. }));
    }

    #[test]
    fn other_api_errors_are_request_failures() {
        let parsed: ApiError =
            serde_json::from_str(r#"{"error": {"code": 400, "message": "bad model"}}"#).unwrap();
        let err = api_error(parsed.error, Some(StatusCode::BAD_REQUEST), None);
        assert!(matches!(err, LlmError::RequestFailed { ref reason, .. } if reason.contains("bad model")));
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn response_parses_content_and_usage() {
        let parsed: ChatCompletionResponse = serde_json::from_str(
            r#"{
                "model": "google/gemini-flash-1.5:free",
                "choices": [{"message": {"role": "assistant", "content": "Namaste"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Namaste"));
        assert_eq!(parsed.usage.unwrap().completion_tokens, 3);
        assert_eq!(
            FinishReason::from_api(parsed.choices[0].finish_reason.as_deref()),
            FinishReason::Stop
        );
    }
}
