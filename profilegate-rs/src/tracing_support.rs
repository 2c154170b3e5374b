//! Tracing and logging support.
//!
//! The engine always emits `tracing` events. With the `subscriber` feature
//! (on by default) this module also installs a `tracing-subscriber` stack
//! configured from [`TracingConfig`].

use serde::{Deserialize, Serialize};

pub use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "subscriber")]
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Human-readable format with colors (default for development).
    #[default]
    Pretty,

    /// Compact format without colors.
    Compact,

    /// JSON format (recommended for production, pairs with the JSONL audit log).
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<tracing::Level>,

    pub format: TracingFormat,

    /// Include timestamps in output.
    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,

    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

/// Initialize tracing with default settings.
///
/// Uses RUST_LOG for level filtering, falling back to "info".
///
/// # Environment Variables
///
/// - `RUST_LOG=debug` - Enable debug logs
/// - `RUST_LOG=profilegate=trace,profilegate_host=debug` - Per-crate filtering
#[cfg(feature = "subscriber")]
pub fn init_subscriber() -> Result<(), tracing_subscriber::util::TryInitError> {
    init_subscriber_with_config(TracingConfig::default())
}

/// Initialize tracing with a custom configuration.
///
/// Fails if a global subscriber is already installed.
///
/// # Example
///
/// ```ignore
/// use profilegate::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
///
/// init_subscriber_with_config(TracingConfig {
///     format: TracingFormat::Json,
///     ..Default::default()
/// })?;
/// ```
#[cfg(feature = "subscriber")]
pub fn init_subscriber_with_config(
    config: TracingConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(fmt_layer(&config))
        .with(filter)
        .try_init()
}

#[cfg(feature = "subscriber")]
fn fmt_layer<S>(config: &TracingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_target(config.target)
        .with_thread_ids(config.thread_ids);

    match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => layer.pretty().boxed(),
        (TracingFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => layer.compact().boxed(),
        (TracingFormat::Compact, false) => layer.compact().without_time().boxed(),
        (TracingFormat::Json, true) => layer.json().boxed(),
        (TracingFormat::Json, false) => layer.json().without_time().boxed(),
    }
}

// Fallback when the subscriber feature is disabled
#[cfg(not(feature = "subscriber"))]
pub fn init_subscriber() -> Result<(), std::convert::Infallible> {
    Ok(())
}
