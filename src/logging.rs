//! Tracing initialization.
//!
//! Diagnostics go to stderr through `tracing`; command output stays on
//! stdout. The filter comes from `RUST_LOG` when set, otherwise from
//! `[logging] level`.

use std::sync::Once;

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Build the filter: `RUST_LOG` wins, then the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| anyhow::anyhow!("invalid logging.level '{}': {}", config.level, e)),
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let json = config.format == "json";

    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    });
    Ok(())
}
