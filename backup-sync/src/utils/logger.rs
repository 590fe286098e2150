//! Logging configuration using tracing.

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging from the `[log]` config section.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_ansi(config.ansi).with_target(false))
            .try_init()?,
        LogFormat::Full => registry.with(fmt::layer().with_ansi(config.ansi)).try_init()?,
    }

    Ok(())
}
