//! Tracing initialization
//!
//! Builds the global subscriber from [`LoggingConfig`]. `RUST_LOG` overrides
//! the configured level when set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Quieter defaults for the noisy layers. Override via RUST_LOG.
        EnvFilter::new(format!(
            "{},tower_http=warn,sqlx=warn,hyper=warn",
            config.level.to_lowercase()
        ))
    });

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false),
                )
                .init();
        }
        LogFormat::Plain => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .init();
        }
    }
}
