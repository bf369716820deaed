//! Layered runtime settings.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `CONDUCTOR__SECTION__KEY` environment variables.

use crate::task::adapters::llm::OpenAiSettings;
use crate::task::domain::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_PROMPT_CHARS, DEFAULT_MAX_RETRIES, RetryPolicy, TaskLimits,
};
use crate::task::services::DispatcherSettings;
use config::{Config, ConfigError, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "conductor";

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Task store connection.
    pub database: DatabaseSettings,
    /// Work queue behaviour.
    pub queue: QueueSettings,
    /// Language model provider.
    pub llm: LlmSettings,
    /// Submission limits and retry defaults.
    pub limits: LimitSettings,
    /// Worker pool.
    pub worker: WorkerSettings,
    /// Logging output.
    pub telemetry: TelemetrySettings,
}

/// Task store connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// `PostgreSQL` URL; the in-memory store is used when absent.
    pub url: Option<SecretString>,
    /// Maximum pooled connections.
    pub pool_size: u32,
}

/// Work queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Deadline for one enqueue call.
    pub enqueue_timeout_ms: u64,
}

/// Language model provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    /// API root.
    pub base_url: String,
    /// Bearer token.
    pub api_key: Option<SecretString>,
    /// Model requested for every task.
    pub model: String,
    /// Per-request deadline.
    pub timeout_seconds: u64,
    /// Total attempts per invocation.
    pub retry_attempts: u32,
    /// Base backoff between attempts.
    pub retry_backoff_seconds: f64,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Submission limits.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LimitSettings {
    /// Maximum prompt length in characters.
    pub max_prompt_chars: usize,
    /// Maximum tasks per batch.
    pub max_batch_size: usize,
    /// Retry budget for tasks that do not request one.
    pub default_max_retries: u32,
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Prefix for generated worker identifiers.
    pub id_prefix: String,
    /// Deadline for one language model invocation, including retries.
    pub invoke_timeout_seconds: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Settings {
    /// Loads settings from defaults, `path` (or `conductor.toml` in the
    /// working directory when absent), and the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when an explicit file is missing or any
    /// source holds a malformed value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(explicit) => File::from(explicit).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        with_defaults(Config::builder())?
            .add_source(file)
            .add_source(
                Environment::with_prefix("CONDUCTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parses settings from TOML text layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed TOML or values.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        with_defaults(Config::builder())?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Builds dispatcher settings from the limit and queue sections.
    #[must_use]
    pub const fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            limits: TaskLimits {
                max_prompt_chars: self.limits.max_prompt_chars,
                max_batch_size: self.limits.max_batch_size,
            },
            retry_policy: RetryPolicy::new(self.limits.default_max_retries),
            enqueue_timeout: Duration::from_millis(self.queue.enqueue_timeout_ms),
        }
    }
}

impl LlmSettings {
    /// Converts to the HTTP client settings.
    #[must_use]
    pub fn to_openai_settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            timeout_seconds: self.timeout_seconds,
            retry_attempts: self.retry_attempts,
            retry_backoff_seconds: self.retry_backoff_seconds,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

fn with_defaults<St>(
    builder: config::ConfigBuilder<St>,
) -> Result<config::ConfigBuilder<St>, ConfigError>
where
    St: config::builder::BuilderState,
{
    let max_prompt_chars = i64::try_from(DEFAULT_MAX_PROMPT_CHARS).unwrap_or(i64::MAX);
    let max_batch_size = i64::try_from(DEFAULT_MAX_BATCH_SIZE).unwrap_or(i64::MAX);
    builder
        .set_default("database.pool_size", 8)?
        .set_default("queue.enqueue_timeout_ms", 2_000)?
        .set_default("llm.base_url", "https://api.openai.com/v1")?
        .set_default("llm.model", "gpt-4o-mini")?
        .set_default("llm.timeout_seconds", 60)?
        .set_default("llm.retry_attempts", 3)?
        .set_default("llm.retry_backoff_seconds", 1.0)?
        .set_default("llm.max_tokens", 1_024)?
        .set_default("llm.temperature", 0.2)?
        .set_default("limits.max_prompt_chars", max_prompt_chars)?
        .set_default("limits.max_batch_size", max_batch_size)?
        .set_default("limits.default_max_retries", i64::from(DEFAULT_MAX_RETRIES))?
        .set_default("worker.concurrency", 4)?
        .set_default("worker.id_prefix", "worker")?
        .set_default("worker.invoke_timeout_seconds", 300)?
        .set_default("telemetry.log_level", "info")?
        .set_default("telemetry.json", false)
}
