//! `OpenAI`-compatible chat-completions client.

use crate::task::domain::{Prompt, TokenUsage};
use crate::task::ports::{LlmClient, LlmCompletion, LlmError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection and retry settings for [`OpenAiCompatibleClient`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// API root, for example `https://api.openai.com/v1`.
    pub base_url: String,
    /// Bearer token.
    pub api_key: Option<SecretString>,
    /// Model requested for every call.
    pub model: String,
    /// Per-request deadline in seconds; values below one are raised to one.
    pub timeout_seconds: u64,
    /// Total attempts per invocation; values below one are raised to one.
    pub retry_attempts: u32,
    /// Base backoff in seconds, doubled after each failed attempt.
    pub retry_backoff_seconds: f64,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Language model client speaking the `OpenAI` chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    timeout_seconds: u64,
    retry_attempts: u32,
    retry_backoff: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    /// Creates a client from settings.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::NotConfigured`] when the API key is missing or
    /// blank, or when the HTTP client cannot be built.
    pub fn new(settings: OpenAiSettings) -> Result<Self, LlmError> {
        let api_key = settings
            .api_key
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| LlmError::NotConfigured("llm.api_key is not set".to_owned()))?;
        let timeout_seconds = settings.timeout_seconds.max(1);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|err| LlmError::NotConfigured(err.to_string()))?;
        let retry_backoff = Duration::try_from_secs_f64(settings.retry_backoff_seconds.max(0.0))
            .unwrap_or(Duration::ZERO);

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            api_key,
            model: settings.model,
            timeout_seconds,
            retry_attempts: settings.retry_attempts.max(1),
            retry_backoff,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    async fn send_once(&self, prompt: &Prompt) -> Result<LlmCompletion, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt.as_str() }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|err| self.map_transport_error(&err))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        parse_completion(&payload, &self.model)
    }

    fn map_transport_error(&self, err: &reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                timeout_secs: self.timeout_seconds,
            }
        } else {
            LlmError::Transport(err.to_string())
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn invoke(&self, prompt: &Prompt) -> Result<LlmCompletion, LlmError> {
        let mut attempt = 1;
        loop {
            match self.send_once(prompt).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_retryable() && attempt < self.retry_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "language model request failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(attempt, error = %err, "language model request failed");
                    return Err(err);
                }
            }
        }
    }
}

fn parse_completion(payload: &Value, requested_model: &str) -> Result<LlmCompletion, LlmError> {
    let output = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .ok_or_else(|| {
            LlmError::InvalidResponse("response has no choices or empty content".to_owned())
        })?;
    let count = |field: &str| {
        payload
            .get("usage")
            .and_then(|usage| usage.get(field))
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
    };
    let usage = TokenUsage::from_optional(
        count("prompt_tokens"),
        count("completion_tokens"),
        count("total_tokens"),
    );
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_owned();

    Ok(LlmCompletion {
        output: output.to_owned(),
        usage,
        model: Some(model),
    })
}
