//! Tracing subscriber initialisation.

use crate::config::TelemetrySettings;
use thiserror::Error;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::ParseError,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter directive is malformed.
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),

    /// A global subscriber is already installed.
    #[error("tracing subscriber already initialised: {0}")]
    AlreadyInitialised(#[from] TryInitError),
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `settings.log_level` when set.
///
/// # Errors
///
/// Returns [`TelemetryError`] for a malformed filter or when a subscriber is
/// already installed.
pub fn init(settings: &TelemetrySettings) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log_level)?,
    };
    let fmt_layer = if settings.json {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
