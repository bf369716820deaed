//! Port for the external language model invocation.

use crate::task::domain::{Prompt, TokenUsage};
use async_trait::async_trait;
use thiserror::Error;

/// Result of one successful model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCompletion {
    /// Generated text.
    pub output: String,
    /// Token counts, when the provider reported all of them.
    pub usage: Option<TokenUsage>,
    /// Model that served the request.
    pub model: Option<String>,
}

/// Language model invocation contract.
///
/// Implementations own their timeout and retry-with-backoff behaviour.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends `prompt` and returns the completion.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] when every attempt fails.
    async fn invoke(&self, prompt: &Prompt) -> Result<LlmCompletion, LlmError>;
}

/// Errors returned by language model clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// Required configuration is missing.
    #[error("language model client is not configured: {0}")]
    NotConfigured(String),

    /// The request exceeded its deadline.
    #[error("language model request timed out after {timeout_secs} s")]
    Timeout {
        /// Deadline that elapsed.
        timeout_secs: u64,
    },

    /// The provider answered with a non-success status.
    #[error("language model provider returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// The request did not reach the provider.
    #[error("language model transport error: {0}")]
    Transport(String),

    /// The provider answered with an unusable payload.
    #[error("invalid language model response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Returns a stable machine-readable class, recorded as the attempt's
    /// error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "not_configured",
            Self::Timeout { .. } => "timeout",
            Self::Http { .. } => "http_error",
            Self::Transport(_) => "transport_error",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Returns `true` when another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::Http { status, .. } => matches!(*status, 429 | 500 | 502 | 503 | 504),
            Self::NotConfigured(_) | Self::InvalidResponse(_) => false,
        }
    }
}
