// Observability infrastructure using tracing crate
// Structured logging for the console, JSON for machines or text for terminals

use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

/// Filter used by `--verbose`, overriding configuration but not RUST_LOG
pub const VERBOSE_FILTER: &str = "probe_console=debug,tower_http=debug";

/// Initialize the global subscriber
/// RUST_LOG wins over the configured filter, e.g. RUST_LOG=probe_console=trace
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let default_filter = if verbose { VERBOSE_FILTER } else { config.filter.as_str() };
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .with_context(|| format!("Invalid log filter '{}'", default_filter))?;

    let registry = tracing_subscriber::registry().with(filter_layer);

    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .context("Failed to install tracing subscriber")?,
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).compact())
            .try_init()
            .context("Failed to install tracing subscriber")?,
    }

    Ok(())
}

/// Span wrapping one collection run
#[inline]
pub fn collection_span(use_cache: bool) -> tracing::Span {
    tracing::info_span!(
        "collection",
        run_id = %uuid::Uuid::new_v4(),
        use_cache = use_cache,
    )
}
