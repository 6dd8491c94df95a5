//! Structured logging setup.
//!
//! Library code only emits `tracing` events; the binary decides where they go by
//! installing a subscriber once at startup. Tests can scope their own subscriber with
//! `tracing::subscriber::with_default`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogSettings;

/// Builds the filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,repostats={level}",
            level = settings.level.to_lowercase()
        ))
    })
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &LogSettings) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
