//! Logging initialization
//!
//! Sets up a `tracing` subscriber with an `EnvFilter`. The checker's own
//! level and the level of the Kubernetes client stack are configured
//! separately, so `debug` output of a run is not buried under HTTP traces.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives could not be parsed
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// Failed to install the global subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format of log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, one event per line
    #[default]
    Text,
    /// JSON objects with the current span
    Json,
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the checker's own targets (e.g., "info", "debug")
    pub level: String,
    /// Level for kube, hyper and tower
    pub kubernetes_level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            kubernetes_level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Filter directives for this configuration.
    ///
    /// `RUST_LOG` overrides the directives entirely when set.
    pub fn directives(&self) -> String {
        format!(
            "{level},compliance={level},compliance_common={level},kube={kube},kube_client={kube},hyper={kube},tower={kube}",
            level = self.level,
            kube = self.kubernetes_level,
        )
    }
}

/// Install the global tracing subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.directives())
            .map_err(|e| TelemetryError::Filter(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}
